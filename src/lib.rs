//! sharefetch - a SharePoint document synchronization pipeline.
//!
//! Authenticates on behalf of an interactive user (authorization-code +
//! proof-key flow with a local callback listener), discovers every document
//! reachable from a site into a frozen catalog, and bulk-transfers the
//! payloads into local storage and/or a remote indexing service with
//! bounded concurrency, retry, and progress reporting.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sharefetch::{
//!     AuthConfig, AuthSession, CatalogWalker, GraphClient, NoProgress, SiteAddress,
//!     TokenStore, TransferConfig, TransferManager, TransferProgress,
//! };
//!
//! # async fn example() -> sharefetch::Result<()> {
//! // Interactive sign-in.
//! let session = Arc::new(AuthSession::new(AuthConfig::new("client-id"))?);
//! let request = session.begin().await?;
//! println!("Open this URL in your browser: {}", request.authorize_url);
//! let credential = session.complete(request).await?;
//!
//! // Discover the catalog.
//! let tokens = Arc::new(TokenStore::new(credential, session));
//! let graph = Arc::new(GraphClient::new(Arc::clone(&tokens))?);
//! let site = SiteAddress::parse("https://contoso.sharepoint.com/sites/docs")?;
//! let catalog = CatalogWalker::new(Arc::clone(&graph)).scan_site(&site).await?;
//!
//! // Transfer everything.
//! let manager = TransferManager::new(graph, tokens, TransferConfig::default());
//! let progress: Arc<dyn TransferProgress> = Arc::new(NoProgress);
//! let outcomes = manager
//!     .bulk_transfer(&catalog, "downloads".as_ref(), &progress, None)
//!     .await?;
//! println!("{} documents processed", outcomes.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod format;
pub mod fs;
pub mod graph;
pub mod ingest;
pub mod metadata;
pub mod site;
pub mod transfer;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for convenience
pub use auth::{AuthSession, AuthState, AuthorizationRequest, Credential, TokenRefresher, TokenStore};
pub use catalog::{Catalog, CatalogWalker, CollectionRef, DocumentRecord, ScanStats};
pub use config::{AppConfig, AuthConfig, IndexConfig, PathConfig, TransferConfig};
pub use error::{ApiError, ApiResult, Error, ErrorKind, Result};
pub use format::{format_bytes, format_duration};
pub use fs::{FileSystem, TokioFileSystem};
pub use graph::{DocumentService, GraphClient, ListedItem, Listing};
pub use ingest::{
    HttpIndexClient, IndexIngestor, IndexService, IngestItem, IngestRequest, IngestResult,
    JobState,
};
pub use metadata::CatalogSnapshot;
pub use site::SiteAddress;
pub use transfer::{
    IngestStatus, NoProgress, TransferManager, TransferOutcome, TransferProgress, TransferStatus,
    sanitize_filename,
};
