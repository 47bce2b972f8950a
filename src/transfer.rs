//! Bulk document transfer with bounded concurrency, retry, and observable
//! progress.
//!
//! [`TransferManager`] consumes a frozen [`Catalog`] and moves every
//! document to the destination directory (and optionally into the indexing
//! sink), fanning work out to a fixed-size pool. Documents are independent:
//! a failure is recorded in the outcome map and never aborts the batch.
//! Only authentication failures abort, since no further document could
//! succeed without a credential.

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::auth::TokenStore;
use crate::catalog::{Catalog, DocumentRecord};
use crate::config::TransferConfig;
use crate::error::{ErrorKind, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::graph::DocumentService;
use crate::ingest::{IndexIngestor, IngestResult};

/// Trait for receiving transfer progress updates.
///
/// All methods have default no-op implementations. `on_progress` is invoked
/// after every document completes, exactly once per document, with a
/// strictly increasing completed count regardless of completion order.
pub trait TransferProgress: Send + Sync {
    /// Called when work on a document starts.
    fn on_document_start(&self, _record: &DocumentRecord) {}

    /// Called after each document finishes, with `(completed, total)`.
    fn on_progress(&self, _completed: usize, _total: usize) {}

    /// Called with the final outcome of each document.
    fn on_document_complete(&self, _record: &DocumentRecord, _outcome: &TransferOutcome) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl TransferProgress for NoProgress {}

/// Whether a document reached the indexing sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// A sink was configured but this document never reached it.
    NotAttempted,
    Succeeded,
    Failed,
}

/// Terminal state of one document in a transfer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Downloaded (and renamed into place) during this run.
    Succeeded,
    /// Gave up on this document; the batch continued.
    Failed(ErrorKind),
    /// Not transferred: already present, cancelled, or never started.
    Skipped,
}

/// Per-document result of a bulk transfer, keyed by document id in the
/// returned map.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub document_id: String,
    pub status: TransferStatus,
    /// Final local path, present when the file exists there.
    pub local_path: Option<PathBuf>,
    /// Indexing result; `None` when no sink is configured.
    pub ingest: Option<IngestStatus>,
}

enum AttemptError {
    Cancelled,
    Failed(ErrorKind),
}

/// Moves every document in a catalog to the destination sinks.
pub struct TransferManager<S, F = TokioFileSystem> {
    service: Arc<S>,
    tokens: Arc<TokenStore>,
    config: TransferConfig,
    fs: F,
    ingestor: Option<Arc<IndexIngestor>>,
}

impl<S: DocumentService> TransferManager<S> {
    /// Creates a manager with the default file system.
    #[must_use]
    pub fn new(service: Arc<S>, tokens: Arc<TokenStore>, config: TransferConfig) -> Self {
        Self {
            service,
            tokens,
            config,
            fs: TokioFileSystem,
            ingestor: None,
        }
    }
}

impl<S: DocumentService, F: FileSystem> TransferManager<S, F> {
    /// Creates a manager with a custom file system implementation.
    #[must_use]
    pub const fn with_fs(
        service: Arc<S>,
        tokens: Arc<TokenStore>,
        config: TransferConfig,
        fs: F,
    ) -> Self {
        Self {
            service,
            tokens,
            config,
            fs,
            ingestor: None,
        }
    }

    /// Configures the indexing sink.
    #[must_use]
    pub fn with_ingestor(mut self, ingestor: Arc<IndexIngestor>) -> Self {
        self.ingestor = Some(ingestor);
        self
    }

    /// Transfers every document in the catalog, returning one outcome per
    /// document keyed by document id.
    ///
    /// Cancellation stops issuing new work immediately; in-flight documents
    /// abort cleanly and everything not yet transferred reports `Skipped`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` when no valid credential can be
    /// obtained; document-level failures never produce an `Err`.
    pub async fn bulk_transfer(
        &self,
        catalog: &Catalog,
        dest_dir: &Path,
        progress: &Arc<dyn TransferProgress>,
        cancel: Option<CancellationToken>,
    ) -> Result<HashMap<String, TransferOutcome>> {
        let total = catalog.len();
        let plan = self.plan_destinations(catalog, dest_dir).await;
        let completed = Mutex::new(0usize);

        let results: Vec<Result<TransferOutcome>> = stream::iter(plan)
            .map(|(record, dest)| {
                let cancel = cancel.clone();
                let progress = Arc::clone(progress);
                let completed = &completed;
                async move {
                    progress.on_document_start(&record);
                    let result = self.transfer_document(&record, dest, cancel).await;
                    if let Ok(outcome) = &result {
                        // Serialized so the completed count is delivered
                        // exactly once per document, strictly increasing.
                        let mut done = completed.lock().expect("progress lock poisoned");
                        *done += 1;
                        progress.on_progress(*done, total);
                        progress.on_document_complete(&record, outcome);
                    }
                    result
                }
            })
            .buffer_unordered(self.config.max_parallel.max(1))
            .collect()
            .await;

        let mut outcomes = HashMap::with_capacity(total);
        for result in results {
            let outcome = result?;
            outcomes.insert(outcome.document_id.clone(), outcome);
        }
        Ok(outcomes)
    }

    /// Resolves the destination path for every document up front.
    ///
    /// Within a run, and against leftovers of unrelated prior runs, name
    /// collisions are resolved deterministically by appending the document
    /// id to the file stem; nothing is ever silently overwritten.
    async fn plan_destinations(
        &self,
        catalog: &Catalog,
        dest_dir: &Path,
    ) -> Vec<(DocumentRecord, PathBuf)> {
        let mut claimed: HashSet<PathBuf> = HashSet::new();
        let mut plan = Vec::with_capacity(catalog.len());
        for record in catalog.documents() {
            let mut dir = dest_dir.to_path_buf();
            for segment in &record.remote_path.path {
                dir.push(sanitize_filename(segment));
            }
            let mut dest = dir.join(sanitize_filename(&record.name));

            let occupied_on_disk = !self.config.force_refresh
                && matches!(
                    self.fs.file_size(&dest).await,
                    Some(size) if size != record.size_bytes
                );
            if claimed.contains(&dest) || occupied_on_disk {
                dest = with_id_suffix(&dest, &record.id);
            }
            claimed.insert(dest.clone());
            plan.push((record.clone(), dest));
        }
        plan
    }

    async fn transfer_document(
        &self,
        record: &DocumentRecord,
        dest: PathBuf,
        cancel: Option<CancellationToken>,
    ) -> Result<TransferOutcome> {
        // Absent means "no sink configured"; a configured sink starts out
        // not attempted.
        let ingest_idle = self.ingestor.as_ref().map(|_| IngestStatus::NotAttempted);

        let skipped = |local_path: Option<PathBuf>| TransferOutcome {
            document_id: record.id.clone(),
            status: TransferStatus::Skipped,
            local_path,
            ingest: ingest_idle,
        };

        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Ok(skipped(None));
        }

        if !self.config.force_refresh
            && self.fs.file_size(&dest).await == Some(record.size_bytes)
        {
            log::debug!(
                "document {} already present at {}, skipping",
                record.id,
                dest.display()
            );
            return Ok(skipped(Some(dest)));
        }

        // Pull a fresh token before touching the service; a refresh failure
        // here aborts the batch.
        self.tokens.get_valid().await?;

        let mut attempt: u32 = 0;
        loop {
            match self.attempt_download(record, &dest, attempt, cancel.as_ref()).await {
                Ok(()) => {
                    let ingest = match &self.ingestor {
                        Some(ingestor) => Some(
                            match ingestor.ingest(&dest, &record.id, &record.name).await {
                                IngestResult::Succeeded => IngestStatus::Succeeded,
                                IngestResult::Failed(reason) => {
                                    log::error!(
                                        "ingestion of document {} failed: {reason}",
                                        record.id
                                    );
                                    IngestStatus::Failed
                                }
                            },
                        ),
                        None => None,
                    };
                    return Ok(TransferOutcome {
                        document_id: record.id.clone(),
                        status: TransferStatus::Succeeded,
                        local_path: Some(dest),
                        ingest,
                    });
                }
                Err(AttemptError::Cancelled) => return Ok(skipped(None)),
                Err(AttemptError::Failed(kind)) => {
                    attempt += 1;
                    if !kind.is_retryable() || attempt > self.config.max_retries {
                        log::error!(
                            "download of document {} failed after {attempt} attempt(s): {kind}",
                            record.id
                        );
                        return Ok(TransferOutcome {
                            document_id: record.id.clone(),
                            status: TransferStatus::Failed(kind),
                            local_path: None,
                            ingest: ingest_idle,
                        });
                    }
                    let delay = self
                        .config
                        .retry_base_delay()
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    log::warn!(
                        "download attempt {attempt} for document {} failed ({kind}), \
                         retrying in {delay:?}",
                        record.id
                    );
                    match cancel.as_ref() {
                        Some(token) => tokio::select! {
                            () = token.cancelled() => return Ok(skipped(None)),
                            () = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }
    }

    /// One download attempt: resolve the URL, fetch the payload, and write
    /// it atomically (`.part` then rename) under the destination path.
    async fn attempt_download(
        &self,
        record: &DocumentRecord,
        dest: &Path,
        attempt: u32,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<(), AttemptError> {
        // The cached URL is only trusted on the first attempt; download URLs
        // are short-lived, so retries re-resolve.
        let url = match (&record.download_url, attempt) {
            (Some(url), 0) => url.clone(),
            _ => self
                .service
                .get_download_url(&record.id)
                .await
                .map_err(|e| {
                    log::warn!("cannot resolve download URL for document {}: {e}", record.id);
                    AttemptError::Failed(e.kind())
                })?,
        };

        let fetch = self.service.fetch(&url);
        let bytes = match cancel {
            Some(token) => tokio::select! {
                result = fetch => result,
                () = token.cancelled() => return Err(AttemptError::Cancelled),
            },
            None => fetch.await,
        }
        .map_err(|e| {
            log::warn!("fetch failed for document {}: {e}", record.id);
            AttemptError::Failed(e.kind())
        })?;

        if bytes.len() as u64 != record.size_bytes {
            log::warn!(
                "document {} payload size mismatch (got {}, expected {})",
                record.id,
                bytes.len(),
                record.size_bytes
            );
            return Err(AttemptError::Failed(ErrorKind::Transient));
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|_| AttemptError::Failed(ErrorKind::LocalIo))?;
        }

        let part = part_path(dest);
        if let Err(e) = self.fs.write_file(&part, &bytes).await {
            log::error!("cannot write {}: {e}", part.display());
            return Err(AttemptError::Failed(ErrorKind::LocalIo));
        }

        // Verify the full write landed before renaming into place.
        if self.fs.file_size(&part).await != Some(record.size_bytes) {
            self.cleanup_part(&part).await;
            return Err(AttemptError::Failed(ErrorKind::LocalIo));
        }

        // A cancellation observed here aborts cleanly: the temp file goes,
        // the final path is never touched.
        if cancel.is_some_and(|token| token.is_cancelled()) {
            let _ = self.fs.remove_file(&part).await;
            return Err(AttemptError::Cancelled);
        }

        if let Err(e) = self.fs.rename_file(&part, dest).await {
            log::error!("cannot rename {} into place: {e}", part.display());
            self.cleanup_part(&part).await;
            return Err(AttemptError::Failed(ErrorKind::LocalIo));
        }
        Ok(())
    }

    async fn cleanup_part(&self, part: &Path) {
        if self.config.cleanup_on_error {
            let _ = self.fs.remove_file(part).await;
        }
    }
}

/// Returns the `.part` temp path for a final path.
fn part_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

/// Sanitizes a name for safe file-system storage: illegal characters become
/// `_`, surrounding dots/spaces are stripped, overlong names are truncated
/// preserving the extension.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    const INVALID: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let replaced: String = name
        .chars()
        .map(|c| {
            if INVALID.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        return "unknown_file".to_string();
    }
    if trimmed.len() <= 200 {
        return trimmed.to_string();
    }

    let (stem, ext) = match trimmed.rfind('.') {
        Some(idx) if idx > 0 => trimmed.split_at(idx),
        _ => (trimmed, ""),
    };
    let keep = 200_usize.saturating_sub(ext.len());
    let mut truncated: String = String::with_capacity(200);
    for c in stem.chars() {
        if truncated.len() + c.len_utf8() > keep {
            break;
        }
        truncated.push(c);
    }
    truncated.push_str(ext);
    truncated
}

/// Disambiguates a destination by appending the document id to the stem.
fn with_id_suffix(path: &Path, document_id: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("unknown_file");
    let safe_id = sanitize_filename(document_id);
    let new_name = match file_name.rfind('.') {
        Some(idx) if idx > 0 => {
            format!("{}-{safe_id}{}", &file_name[..idx], &file_name[idx..])
        }
        _ => format!("{file_name}-{safe_id}"),
    };
    path.with_file_name(new_name)
}
