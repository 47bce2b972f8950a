use std::env;

fn print_usage() {
    eprintln!("Usage: sharefetch [OPTIONS] <COMMAND> [COMMAND OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  test                     Test the SharePoint connection");
    eprintln!("  scan [--output PATH]     Scan and save document metadata");
    eprintln!("  download [--output-dir DIR] [--bedrock] [--metadata-file PATH]");
    eprintln!("           [--force] [--max-parallel N]");
    eprintln!("                           Download documents (optionally ingesting them)");
    eprintln!("  config                   Show configuration status");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --site-url <URL>         SharePoint site URL");
    eprintln!("  --client-id <ID>         Azure AD app registration client id");
    eprintln!("  --tenant-id <ID>         Azure AD tenant id");
    eprintln!("  --config-file <PATH>     TOML config file");
    eprintln!("  -h, --help               Show this help");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  SHAREPOINT_SITE_URL        SharePoint site URL");
    eprintln!("  AZURE_CLIENT_ID            Azure AD app registration client id");
    eprintln!("  AZURE_TENANT_ID            Azure AD tenant id (optional)");
    eprintln!("  AZURE_CLIENT_SECRET        Azure AD client secret (optional)");
    eprintln!("  AZURE_REDIRECT_URI         OAuth redirect URI (optional)");
    eprintln!("  BEDROCK_KNOWLEDGE_BASE_ID  Knowledge base id for --bedrock");
    eprintln!("  BEDROCK_DATA_SOURCE_ID     Data source id for --bedrock");
    eprintln!("  AWS_REGION                 Indexing service region (default: us-east-1)");
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        std::process::exit(i32::from(args.is_empty()));
    }

    #[cfg(feature = "cli")]
    {
        std::process::exit(sharefetch::cli::run().await);
    }
    #[cfg(not(feature = "cli"))]
    {
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}
