//! Configuration types and environment loading.
//!
//! Required settings come from environment variables (the deployment
//! contract), with tuning knobs optionally overridden by a TOML file under
//! the user's config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default OAuth redirect URI when `AZURE_REDIRECT_URI` is unset.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";

/// Graph scopes requested during the delegated authorization flow.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://graph.microsoft.com/Sites.Read.All",
    "https://graph.microsoft.com/Files.Read.All",
    "offline_access",
];

/// Settings for the interactive authorization flow.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Azure AD app registration client id.
    pub client_id: String,
    /// Azure AD tenant id; the `common` authority is used when absent.
    pub tenant_id: Option<String>,
    /// Optional client secret, included in token exchanges when present.
    pub client_secret: Option<String>,
    /// OAuth redirect URI; its port hosts the local callback listener.
    pub redirect_uri: String,
    /// Scopes requested in the authorization URL.
    pub scopes: Vec<String>,
}

impl AuthConfig {
    /// Creates a config for the given client id with default redirect and
    /// scopes.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: None,
            client_secret: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
        }
    }

    /// Loads auth settings from `AZURE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `AZURE_CLIENT_ID` is unset.
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("AZURE_CLIENT_ID").map_err(|_| {
            Error::Configuration("AZURE_CLIENT_ID environment variable is required".to_string())
        })?;
        let mut config = Self::new(client_id);
        config.tenant_id = std::env::var("AZURE_TENANT_ID").ok();
        config.client_secret = std::env::var("AZURE_CLIENT_SECRET").ok();
        if let Ok(uri) = std::env::var("AZURE_REDIRECT_URI") {
            config.redirect_uri = uri;
        }
        Ok(config)
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// The token/authorize endpoint authority for this tenant.
    #[must_use]
    pub fn authority(&self) -> String {
        let tenant = self.tenant_id.as_deref().unwrap_or("common");
        format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0")
    }

    /// Validates client id and redirect URI shape.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when either is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() || self.client_id.contains(char::is_whitespace) {
            return Err(Error::Configuration("client id is malformed".to_string()));
        }
        self.redirect_port()?;
        Ok(())
    }

    /// Extracts the callback listener port from the redirect URI.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when the URI cannot be parsed or has
    /// no usable port.
    pub fn redirect_port(&self) -> Result<u16> {
        let url = reqwest::Url::parse(&self.redirect_uri).map_err(|e| {
            Error::Configuration(format!("invalid redirect URI {:?}: {e}", self.redirect_uri))
        })?;
        url.port_or_known_default().ok_or_else(|| {
            Error::Configuration(format!("redirect URI {:?} has no port", self.redirect_uri))
        })
    }

    /// The path component the callback listener routes on.
    #[must_use]
    pub fn redirect_path(&self) -> String {
        reqwest::Url::parse(&self.redirect_uri)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/callback".to_string())
    }
}

/// Tuning for bulk transfer operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Number of concurrent document transfers.
    pub max_parallel: usize,
    /// Retry attempts per document after the first failure.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Per-request timeout for downloads, in seconds.
    pub request_timeout_secs: u64,
    /// Re-download documents even when a same-size local file exists.
    pub force_refresh: bool,
    /// Whether to remove `.part` files after a failed attempt.
    pub cleanup_on_error: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            request_timeout_secs: 60,
            force_refresh: false,
            cleanup_on_error: true,
        }
    }
}

impl TransferConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent transfers.
    #[must_use]
    pub const fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    /// Sets the retry budget per document.
    #[must_use]
    pub const fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Sets the backoff base delay in milliseconds.
    #[must_use]
    pub const fn with_retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.retry_base_delay_ms = ms;
        self
    }

    /// Sets whether existing same-size files are re-downloaded.
    #[must_use]
    pub const fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Backoff base delay as a `Duration`.
    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Download request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the remote indexing service sink.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Knowledge base to ingest into.
    pub knowledge_base_id: String,
    /// Data source within the knowledge base.
    pub data_source_id: String,
    /// Service region, used to derive the endpoint.
    pub region: String,
    /// Delay between ingest-job polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Overall deadline for one ingest-and-poll cycle, in seconds.
    pub poll_timeout_secs: u64,
}

impl IndexConfig {
    /// Loads index settings from `BEDROCK_*` environment variables.
    ///
    /// Returns `None` when the knowledge base or data source id is unset;
    /// the indexing sink is optional.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let knowledge_base_id = std::env::var("BEDROCK_KNOWLEDGE_BASE_ID").ok()?;
        let data_source_id = std::env::var("BEDROCK_DATA_SOURCE_ID").ok()?;
        Some(Self {
            knowledge_base_id,
            data_source_id,
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            poll_interval_ms: 2_000,
            poll_timeout_secs: 120,
        })
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Poll deadline as a `Duration`.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Path configuration for downloads and metadata output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory where downloaded documents are saved.
    pub download_dir: PathBuf,
    /// Default output file for catalog metadata.
    pub metadata_file: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            metadata_file: PathBuf::from("sharepoint_documents.json"),
        }
    }
}

/// Optional TOML overrides read from the user's config directory.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    transfer: Option<TransferConfig>,
    #[serde(default)]
    paths: Option<PathConfig>,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SharePoint site URL to operate against.
    pub site_url: String,
    /// Authorization flow settings.
    pub auth: AuthConfig,
    /// Transfer tuning.
    pub transfer: TransferConfig,
    /// Indexing sink settings, when configured.
    pub index: Option<IndexConfig>,
    /// Download and metadata paths.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Default location of the optional TOML config file.
    #[must_use]
    pub fn default_config_file() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sharefetch").join("config.toml"))
    }

    /// Loads configuration from the environment plus an optional TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `SHAREPOINT_SITE_URL` or
    /// `AZURE_CLIENT_ID` is unset, or if an explicitly given config file
    /// cannot be read or parsed.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let site_url = std::env::var("SHAREPOINT_SITE_URL").map_err(|_| {
            Error::Configuration(
                "SHAREPOINT_SITE_URL environment variable is required".to_string(),
            )
        })?;
        let auth = AuthConfig::from_env()?;

        let file = match config_file {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_config_file() {
                // A missing default file is fine; a broken one is not.
                Some(path) if path.exists() => Self::read_file(&path)?,
                _ => FileConfig::default(),
            },
        };

        Ok(Self {
            site_url,
            auth,
            transfer: file.transfer.unwrap_or_default(),
            index: IndexConfig::from_env(),
            paths: file.paths.unwrap_or_default(),
        })
    }

    fn read_file(path: &Path) -> Result<FileConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("cannot parse config file {}: {e}", path.display()))
        })
    }
}

/// One component's validation result, for the `config` command.
#[derive(Debug)]
pub struct ComponentStatus {
    pub name: &'static str,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Reports which configuration components are usable in the current
/// environment, without failing on the first missing value.
#[must_use]
pub fn validate_env() -> Vec<ComponentStatus> {
    let mut sharepoint = ComponentStatus {
        name: "sharepoint",
        valid: true,
        errors: Vec::new(),
    };
    if std::env::var("SHAREPOINT_SITE_URL").is_err() {
        sharepoint.valid = false;
        sharepoint
            .errors
            .push("SHAREPOINT_SITE_URL environment variable is required".to_string());
    }
    if std::env::var("AZURE_CLIENT_ID").is_err() {
        sharepoint.valid = false;
        sharepoint
            .errors
            .push("AZURE_CLIENT_ID environment variable is required".to_string());
    }

    let mut index = ComponentStatus {
        name: "index",
        valid: true,
        errors: Vec::new(),
    };
    if IndexConfig::from_env().is_none() {
        index.valid = false;
        index.errors.push(
            "BEDROCK_KNOWLEDGE_BASE_ID and BEDROCK_DATA_SOURCE_ID are not both set".to_string(),
        );
    }

    vec![sharepoint, index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_transfer_config() {
        let config = TransferConfig::default();
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.max_retries, 3);
        assert!(!config.force_refresh);
        assert!(config.cleanup_on_error);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn transfer_builder_pattern() {
        let config = TransferConfig::new()
            .with_max_parallel(8)
            .with_max_retries(1)
            .with_retry_base_delay_ms(10)
            .with_force_refresh(true);
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_base_delay_ms, 10);
        assert!(config.force_refresh);
    }

    #[test]
    fn transfer_config_toml_round_trip() {
        let config = TransferConfig::default().with_max_parallel(2);
        let s = toml::to_string(&config).unwrap();
        let loaded: TransferConfig = toml::from_str(&s).unwrap();
        assert_eq!(loaded.max_parallel, 2);
        assert_eq!(loaded.max_retries, config.max_retries);
    }

    #[test]
    fn partial_file_config_uses_defaults() {
        let file: FileConfig = toml::from_str("[transfer]\nmax_parallel = 9\n").unwrap();
        let transfer = file.transfer.unwrap();
        assert_eq!(transfer.max_parallel, 9);
        assert_eq!(transfer.max_retries, TransferConfig::default().max_retries);
        assert!(file.paths.is_none());
    }

    #[test]
    fn authority_defaults_to_common() {
        let config = AuthConfig::new("client-123");
        assert_eq!(
            config.authority(),
            "https://login.microsoftonline.com/common/oauth2/v2.0"
        );
        let config = config.with_tenant_id("tenant-9");
        assert_eq!(
            config.authority(),
            "https://login.microsoftonline.com/tenant-9/oauth2/v2.0"
        );
    }

    #[test]
    fn redirect_port_parses() {
        let config = AuthConfig::new("c");
        assert_eq!(config.redirect_port().unwrap(), 8080);
        assert_eq!(config.redirect_path(), "/callback");

        let config = config.with_redirect_uri("http://localhost:9999/auth/done");
        assert_eq!(config.redirect_port().unwrap(), 9999);
        assert_eq!(config.redirect_path(), "/auth/done");
    }

    #[test]
    fn malformed_redirect_uri_is_configuration_error() {
        let config = AuthConfig::new("c").with_redirect_uri("not a uri");
        assert!(matches!(
            config.validate(),
            Err(crate::Error::Configuration(_))
        ));
    }

    #[test]
    fn blank_client_id_is_rejected() {
        let config = AuthConfig::new("  ");
        assert!(matches!(
            config.validate(),
            Err(crate::Error::Configuration(_))
        ));
    }

    #[test]
    fn default_paths() {
        let paths = PathConfig::default();
        assert_eq!(paths.download_dir, PathBuf::from("downloads"));
        assert_eq!(paths.metadata_file, PathBuf::from("sharepoint_documents.json"));
    }
}
