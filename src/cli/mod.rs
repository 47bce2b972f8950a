//! CLI commands: `test`, `scan`, `download`, and `config`.

mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthSession, TokenStore};
use crate::catalog::{Catalog, CatalogWalker};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::graph::{DocumentService, GraphClient};
use crate::ingest::{HttpIndexClient, IndexIngestor};
use crate::metadata::CatalogSnapshot;
use crate::site::SiteAddress;
use crate::transfer::{TransferManager, TransferProgress, TransferStatus};

use progress::{BarProgress, print_document_summary, print_outcome_summary};

#[derive(Debug)]
enum Command {
    Test,
    Scan {
        output: Option<PathBuf>,
    },
    Download {
        output_dir: Option<PathBuf>,
        bedrock: bool,
        metadata_file: Option<PathBuf>,
        force: bool,
        max_parallel: Option<usize>,
    },
    Config,
}

#[derive(Debug)]
struct CliArgs {
    command: Command,
    site_url: Option<String>,
    client_id: Option<String>,
    tenant_id: Option<String>,
    config_file: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> std::result::Result<CliArgs, String> {
    let mut site_url = None;
    let mut client_id = None;
    let mut tenant_id = None;
    let mut config_file = None;
    let mut command: Option<&str> = None;

    let mut output = None;
    let mut output_dir = None;
    let mut bedrock = false;
    let mut metadata_file = None;
    let mut force = false;
    let mut max_parallel = None;

    let take_value = |i: &mut usize, flag: &str| -> std::result::Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("{flag} requires a value"))
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--site-url" => site_url = Some(take_value(&mut i, "--site-url")?),
            "--client-id" => client_id = Some(take_value(&mut i, "--client-id")?),
            "--tenant-id" => tenant_id = Some(take_value(&mut i, "--tenant-id")?),
            "--config-file" => {
                config_file = Some(PathBuf::from(take_value(&mut i, "--config-file")?));
            }
            "--output" => output = Some(PathBuf::from(take_value(&mut i, "--output")?)),
            "--output-dir" => {
                output_dir = Some(PathBuf::from(take_value(&mut i, "--output-dir")?));
            }
            "--metadata-file" => {
                metadata_file = Some(PathBuf::from(take_value(&mut i, "--metadata-file")?));
            }
            "--bedrock" => bedrock = true,
            "--force" => force = true,
            "--max-parallel" => {
                let value = take_value(&mut i, "--max-parallel")?;
                max_parallel = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("--max-parallel: invalid number {value:?}"))?,
                );
            }
            "test" | "scan" | "download" | "config" if command.is_none() => {
                command = Some(args[i].as_str());
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    let command = match command {
        Some("test") => Command::Test,
        Some("scan") => Command::Scan { output },
        Some("download") => Command::Download {
            output_dir,
            bedrock,
            metadata_file,
            force,
            max_parallel,
        },
        Some("config") => Command::Config,
        _ => return Err("no command given (expected test, scan, download, or config)".to_string()),
    };

    Ok(CliArgs {
        command,
        site_url,
        client_id,
        tenant_id,
        config_file,
    })
}

fn load_config(cli: &CliArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config_file.as_deref())?;
    // Command-line values take precedence over the environment.
    if let Some(url) = &cli.site_url {
        config.site_url.clone_from(url);
    }
    if let Some(id) = &cli.client_id {
        config.auth.client_id.clone_from(id);
    }
    if let Some(tenant) = &cli.tenant_id {
        config.auth.tenant_id = Some(tenant.clone());
    }
    Ok(config)
}

/// Runs the interactive authorization flow and wires up the Graph client.
async fn authenticate(config: &AppConfig) -> Result<(Arc<TokenStore>, Arc<GraphClient>)> {
    let session = Arc::new(AuthSession::new(config.auth.clone())?);

    let request = session.begin().await?;
    println!("Open this URL in your browser to sign in:\n");
    println!("  {}\n", request.authorize_url);
    println!("Waiting for the browser flow to complete...");

    let credential = session.complete(request).await?;
    println!("{} Authentication successful\n", style("✓").green());

    let tokens = Arc::new(TokenStore::new(credential, session));
    let graph = Arc::new(GraphClient::new(Arc::clone(&tokens))?);
    Ok((tokens, graph))
}

async fn scan_catalog(config: &AppConfig, graph: &Arc<GraphClient>) -> Result<Catalog> {
    let site = SiteAddress::parse(&config.site_url)?;
    println!("Scanning {site} for documents...");
    CatalogWalker::new(Arc::clone(graph)).scan_site(&site).await
}

async fn cmd_test(config: AppConfig) -> Result<()> {
    println!("Testing SharePoint connection...");
    println!("Site URL: {}", config.site_url);

    let site = SiteAddress::parse(&config.site_url)?;
    let (_tokens, graph) = authenticate(&config).await?;

    let root = graph
        .get_site_root(&site)
        .await
        .map_err(|e| Error::SharePoint(format!("cannot resolve site {site}: {e}")))?;
    let listing = graph
        .list_children(&root.id, None)
        .await
        .map_err(|e| Error::SharePoint(format!("cannot list document libraries: {e}")))?;

    println!(
        "{} Connection test successful ({} document libraries visible)",
        style("✓").green(),
        listing.items.len()
    );
    Ok(())
}

async fn cmd_scan(config: AppConfig, output: Option<PathBuf>) -> Result<()> {
    let (_tokens, graph) = authenticate(&config).await?;
    let catalog = scan_catalog(&config, &graph).await?;

    if catalog.is_empty() {
        println!("No documents found");
        return Ok(());
    }
    print_document_summary(&catalog);

    let output = output.unwrap_or_else(|| config.paths.metadata_file.clone());
    CatalogSnapshot::from_catalog(&catalog, &config.site_url).save(&output)?;
    println!("Document metadata saved to: {}", output.display());
    Ok(())
}

async fn cmd_download(
    config: AppConfig,
    output_dir: Option<PathBuf>,
    bedrock: bool,
    metadata_file: Option<PathBuf>,
    force: bool,
    max_parallel: Option<usize>,
) -> Result<bool> {
    if bedrock && config.index.is_none() {
        return Err(Error::Configuration(
            "--bedrock requires BEDROCK_KNOWLEDGE_BASE_ID and BEDROCK_DATA_SOURCE_ID".to_string(),
        ));
    }

    let (tokens, graph) = authenticate(&config).await?;

    let catalog = match metadata_file {
        Some(path) => {
            println!("Loading documents from metadata file: {}", path.display());
            CatalogSnapshot::load(&path)?.into_catalog()
        }
        None => scan_catalog(&config, &graph).await?,
    };

    if catalog.is_empty() {
        println!("No documents found");
        return Ok(true);
    }
    print_document_summary(&catalog);

    let mut transfer_config = config.transfer.clone();
    if force {
        transfer_config.force_refresh = true;
    }
    if let Some(n) = max_parallel {
        transfer_config.max_parallel = n;
    }

    let mut manager = TransferManager::new(Arc::clone(&graph), tokens, transfer_config);
    if bedrock {
        let index_config = config.index.as_ref().expect("checked above");
        let client = HttpIndexClient::new(index_config)?;
        manager = manager.with_ingestor(Arc::new(
            IndexIngestor::new(Arc::new(client)).with_config(index_config),
        ));
        println!("Will also ingest documents into the knowledge base");
    }

    // Ctrl-C stops issuing new transfers; in-flight documents abort cleanly.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("cancellation requested, no new transfers will start");
                cancel.cancel();
            }
        });
    }

    let dest_dir = output_dir.unwrap_or_else(|| config.paths.download_dir.clone());
    println!("Downloading to: {}", dest_dir.display());

    let bar = Arc::new(BarProgress::new(catalog.len()));
    let progress: Arc<dyn TransferProgress> = bar.clone();
    let outcomes = manager
        .bulk_transfer(&catalog, &dest_dir, &progress, Some(cancel))
        .await?;
    bar.finish();

    print_outcome_summary(&outcomes);
    let all_clean = outcomes
        .values()
        .all(|o| !matches!(o.status, TransferStatus::Failed(_)));
    Ok(all_clean)
}

fn cmd_config(config_file: Option<&std::path::Path>) -> i32 {
    println!("Configuration Status:");
    println!("{}", "=".repeat(50));

    for component in crate::config::validate_env() {
        let status = if component.valid {
            style("valid").green()
        } else {
            style("invalid").red()
        };
        println!("{}: {status}", component.name);
        for error in &component.errors {
            println!("  - {error}");
        }
    }

    if let Some(path) = config_file.map(std::path::Path::to_path_buf).or_else(|| {
        AppConfig::default_config_file().filter(|p| p.exists())
    }) {
        println!("Config file: {}", path.display());
    }
    0
}

/// CLI entry point. Returns the process exit code.
pub async fn run() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{} {message}", style("error:").red());
            eprintln!("Run 'sharefetch --help' for usage.");
            return 2;
        }
    };

    if let Command::Config = cli.command {
        return cmd_config(cli.config_file.as_deref());
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red());
            return 1;
        }
    };

    let result = match cli.command {
        Command::Test => cmd_test(config).await.map(|()| true),
        Command::Scan { output } => cmd_scan(config, output).await.map(|()| true),
        Command::Download {
            output_dir,
            bedrock,
            metadata_file,
            force,
            max_parallel,
        } => cmd_download(config, output_dir, bedrock, metadata_file, force, max_parallel).await,
        Command::Config => unreachable!("handled above"),
    };

    match result {
        Ok(true) => 0,
        // The run finished, but some documents failed and stayed failed.
        Ok(false) => 1,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red());
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_scan_with_output() {
        let cli = parse_args(&strings(&["scan", "--output", "docs.json"])).unwrap();
        let Command::Scan { output } = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(output, Some(PathBuf::from("docs.json")));
    }

    #[test]
    fn parses_download_flags() {
        let cli = parse_args(&strings(&[
            "--site-url",
            "https://contoso.sharepoint.com/sites/x",
            "download",
            "--output-dir",
            "out",
            "--bedrock",
            "--metadata-file",
            "docs.json",
            "--force",
            "--max-parallel",
            "8",
        ]))
        .unwrap();

        assert_eq!(
            cli.site_url.as_deref(),
            Some("https://contoso.sharepoint.com/sites/x")
        );
        let Command::Download {
            output_dir,
            bedrock,
            metadata_file,
            force,
            max_parallel,
        } = cli.command
        else {
            panic!("expected download");
        };
        assert_eq!(output_dir, Some(PathBuf::from("out")));
        assert!(bedrock);
        assert_eq!(metadata_file, Some(PathBuf::from("docs.json")));
        assert!(force);
        assert_eq!(max_parallel, Some(8));
    }

    #[test]
    fn missing_command_is_an_error() {
        assert!(parse_args(&strings(&["--site-url", "x"])).is_err());
        assert!(parse_args(&[]).is_err());
    }

    #[test]
    fn unknown_argument_is_an_error() {
        assert!(parse_args(&strings(&["scan", "--frobnicate"])).is_err());
    }

    #[test]
    fn flag_without_value_is_an_error() {
        let err = parse_args(&strings(&["scan", "--output"])).unwrap_err();
        assert!(err.contains("--output"));
    }

    #[test]
    fn invalid_max_parallel_is_an_error() {
        assert!(parse_args(&strings(&["download", "--max-parallel", "many"])).is_err());
    }
}
