//! Remote indexing-service ingestion.
//!
//! [`IndexIngestor`] wraps the indexing collaborator's ingest-and-poll
//! protocol: submit a document, then poll the job until it reaches a
//! terminal state or a bounded deadline passes. Used by the transfer
//! pipeline as an optional sink.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::config::IndexConfig;
use crate::error::{ApiError, ApiResult, Result};

/// A document submission to the indexing service.
#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    pub document_id: &'a str,
    pub title: &'a str,
    pub mime_type: &'a str,
    pub content: &'a [u8],
}

/// State of an ingest job as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Complete,
    Failed(String),
}

/// The remote indexing service, as consumed by the core.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Submits a document and returns a pollable job id.
    async fn start_ingest_job(&self, request: IngestRequest<'_>) -> ApiResult<String>;

    /// Reports the current state of an ingest job.
    async fn poll_job(&self, job_id: &str) -> ApiResult<JobState>;
}

/// Why an ingestion failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestFailure {
    /// The poll loop hit its deadline before a terminal state.
    Timeout,
    /// The service reached a terminal failure state.
    Rejected(String),
    /// Submitting or polling failed outright.
    Service(String),
    /// The local file could not be read.
    LocalIo(String),
}

impl std::fmt::Display for IngestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("ingestion timed out"),
            Self::Rejected(reason) => write!(f, "ingestion rejected: {reason}"),
            Self::Service(reason) => write!(f, "ingestion service failure: {reason}"),
            Self::LocalIo(reason) => write!(f, "cannot read local file: {reason}"),
        }
    }
}

/// Outcome of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestResult {
    Succeeded,
    Failed(IngestFailure),
}

/// One entry for [`IndexIngestor::batch_ingest`].
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub local_path: PathBuf,
    pub document_id: String,
    pub title: String,
}

/// Drives the ingest-and-poll protocol against an [`IndexService`].
pub struct IndexIngestor {
    service: Arc<dyn IndexService>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl IndexIngestor {
    /// Creates an ingestor with default polling cadence.
    #[must_use]
    pub fn new(service: Arc<dyn IndexService>) -> Self {
        Self {
            service,
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(120),
        }
    }

    /// Sets the delay between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the overall deadline for one ingest-and-poll cycle.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Applies the polling cadence from an [`IndexConfig`].
    #[must_use]
    pub fn with_config(self, config: &IndexConfig) -> Self {
        self.with_poll_interval(config.poll_interval())
            .with_poll_timeout(config.poll_timeout())
    }

    /// Submits one local file and polls until the service reports a
    /// terminal state or the deadline passes.
    pub async fn ingest(&self, local_path: &Path, document_id: &str, title: &str) -> IngestResult {
        let content = match tokio::fs::read(local_path).await {
            Ok(content) => content,
            Err(e) => {
                log::error!("cannot read {} for ingestion: {e}", local_path.display());
                return IngestResult::Failed(IngestFailure::LocalIo(e.to_string()));
            }
        };

        let request = IngestRequest {
            document_id,
            title,
            mime_type: mime_type_for(local_path),
            content: &content,
        };

        log::info!("ingesting document {document_id} ({})", local_path.display());
        let job_id = match self.service.start_ingest_job(request).await {
            Ok(job_id) => job_id,
            Err(ApiError::Timeout) => return IngestResult::Failed(IngestFailure::Timeout),
            Err(e) => {
                log::error!("ingest submission failed for {document_id}: {e}");
                return IngestResult::Failed(IngestFailure::Service(e.to_string()));
            }
        };

        self.poll_until_terminal(&job_id, document_id).await
    }

    async fn poll_until_terminal(&self, job_id: &str, document_id: &str) -> IngestResult {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                log::warn!("ingest poll for document {document_id} hit its deadline");
                return IngestResult::Failed(IngestFailure::Timeout);
            }
            match self.service.poll_job(job_id).await {
                Ok(JobState::Complete) => return IngestResult::Succeeded,
                Ok(JobState::Failed(reason)) => {
                    log::error!("ingestion of document {document_id} rejected: {reason}");
                    return IngestResult::Failed(IngestFailure::Rejected(reason));
                }
                Ok(JobState::Pending | JobState::Running) => {}
                Err(e) if e.kind().is_retryable() => {
                    log::debug!("transient poll failure for document {document_id}: {e}");
                }
                Err(e) => {
                    return IngestResult::Failed(IngestFailure::Service(e.to_string()));
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Ingests documents one at a time, honoring the service's rate limits,
    /// invoking `progress(completed, total)` after each.
    pub async fn batch_ingest(
        &self,
        items: &[IngestItem],
        progress: impl Fn(usize, usize),
    ) -> HashMap<String, IngestResult> {
        let total = items.len();
        let mut results = HashMap::with_capacity(total);
        for (i, item) in items.iter().enumerate() {
            let result = self
                .ingest(&item.local_path, &item.document_id, &item.title)
                .await;
            results.insert(item.document_id.clone(), result);
            progress(i + 1, total);
        }
        results
    }
}

/// MIME type inferred from a file extension.
#[must_use]
pub fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("doc") => "application/msword",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("rtf") => "application/rtf",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Production client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(rename = "statusReason")]
    status_reason: Option<String>,
}

/// HTTP implementation of [`IndexService`] for a knowledge-base style
/// indexing endpoint.
pub struct HttpIndexClient {
    http: reqwest::Client,
    endpoint: String,
    knowledge_base_id: String,
    data_source_id: String,
}

impl HttpIndexClient {
    /// Creates a client for the configured knowledge base.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("https://bedrock-agent.{}.amazonaws.com", config.region),
            knowledge_base_id: config.knowledge_base_id.clone(),
            data_source_id: config.data_source_id.clone(),
        })
    }

    /// Overrides the service endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/knowledgebases/{}/datasources/{}/documents",
            self.endpoint, self.knowledge_base_id, self.data_source_id
        )
    }

    async fn check(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message: String = body.chars().take(200).collect();
        Err(ApiError::from_status(status.as_u16(), message))
    }
}

#[async_trait]
impl IndexService for HttpIndexClient {
    async fn start_ingest_job(&self, request: IngestRequest<'_>) -> ApiResult<String> {
        let payload = serde_json::json!({
            "documents": [{
                "content": {
                    "dataSourceType": "CUSTOM",
                    "custom": {
                        "customDocumentIdentifier": { "id": request.document_id },
                        "inlineContent": {
                            "byteContent": {
                                "data": BASE64.encode(request.content),
                                "mimeType": request.mime_type,
                            },
                            "type": "BYTE",
                        },
                        "sourceType": "IN_LINE",
                    },
                },
                "metadata": {
                    "inlineAttributes": [
                        {
                            "key": "title",
                            "value": { "stringValue": request.title, "type": "STRING" },
                        },
                        {
                            "key": "source",
                            "value": { "stringValue": "SharePoint", "type": "STRING" },
                        },
                    ],
                    "type": "IN_LINE_ATTRIBUTE",
                },
            }],
        });

        let response = self
            .http
            .post(self.documents_url())
            .json(&payload)
            .send()
            .await?;
        Self::check(response).await?;
        // The service tracks ingestion per document id.
        Ok(request.document_id.to_string())
    }

    async fn poll_job(&self, job_id: &str) -> ApiResult<JobState> {
        let url = format!("{}/{job_id}", self.documents_url());
        let response = self.http.get(&url).send().await?;
        let parsed: JobStatusResponse = Self::check(response).await?.json().await?;

        let state = match parsed.status.as_str() {
            "INDEXED" | "COMPLETE" => JobState::Complete,
            "PENDING" | "STARTING" => JobState::Pending,
            "FAILED" | "INDEX_FAILED" => JobState::Failed(
                parsed
                    .status_reason
                    .unwrap_or_else(|| "unspecified failure".to_string()),
            ),
            _ => JobState::Running,
        };
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedService {
        start_result: Option<ApiError>,
        polls: Mutex<VecDeque<ApiResult<JobState>>>,
    }

    impl ScriptedService {
        fn new(polls: Vec<ApiResult<JobState>>) -> Self {
            Self {
                start_result: None,
                polls: Mutex::new(polls.into()),
            }
        }

        fn failing_start(error: ApiError) -> Self {
            Self {
                start_result: Some(error),
                polls: Mutex::new(VecDeque::new()),
            }
        }
    }

    #[async_trait]
    impl IndexService for ScriptedService {
        async fn start_ingest_job(&self, request: IngestRequest<'_>) -> ApiResult<String> {
            match &self.start_result {
                Some(ApiError::Timeout) => Err(ApiError::Timeout),
                Some(e) => Err(ApiError::Transient(e.to_string())),
                None => Ok(format!("job-{}", request.document_id)),
            }
        }

        async fn poll_job(&self, _job_id: &str) -> ApiResult<JobState> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                // Keep reporting Running once the script runs out.
                .unwrap_or(Ok(JobState::Running))
        }
    }

    fn fast_ingestor(service: ScriptedService) -> IndexIngestor {
        IndexIngestor::new(Arc::new(service))
            .with_poll_interval(Duration::from_millis(1))
            .with_poll_timeout(Duration::from_millis(250))
    }

    fn write_doc(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"document body").unwrap();
        path
    }

    #[tokio::test]
    async fn ingest_succeeds_after_polling() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "report.pdf");
        let ingestor = fast_ingestor(ScriptedService::new(vec![
            Ok(JobState::Pending),
            Ok(JobState::Running),
            Ok(JobState::Complete),
        ]));

        let result = ingestor.ingest(&path, "doc-1", "report").await;
        assert_eq!(result, IngestResult::Succeeded);
    }

    #[tokio::test]
    async fn rejected_job_reports_reason() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "report.pdf");
        let ingestor = fast_ingestor(ScriptedService::new(vec![Ok(JobState::Failed(
            "unsupported format".to_string(),
        ))]));

        let result = ingestor.ingest(&path, "doc-1", "report").await;
        assert_eq!(
            result,
            IngestResult::Failed(IngestFailure::Rejected("unsupported format".to_string()))
        );
    }

    #[tokio::test]
    async fn poll_loop_times_out() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "report.pdf");
        // The script never reaches a terminal state.
        let ingestor = fast_ingestor(ScriptedService::new(vec![]));

        let result = ingestor.ingest(&path, "doc-1", "report").await;
        assert_eq!(result, IngestResult::Failed(IngestFailure::Timeout));
    }

    #[tokio::test]
    async fn transient_poll_failures_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "report.pdf");
        let ingestor = fast_ingestor(ScriptedService::new(vec![
            Err(ApiError::Transient("blip".to_string())),
            Ok(JobState::Complete),
        ]));

        let result = ingestor.ingest(&path, "doc-1", "report").await;
        assert_eq!(result, IngestResult::Succeeded);
    }

    #[tokio::test]
    async fn submission_failure_is_service_failure() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(&dir, "report.pdf");
        let ingestor = fast_ingestor(ScriptedService::failing_start(ApiError::Transient(
            "boom".to_string(),
        )));

        let result = ingestor.ingest(&path, "doc-1", "report").await;
        assert!(matches!(
            result,
            IngestResult::Failed(IngestFailure::Service(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_local_io_failure() {
        let ingestor = fast_ingestor(ScriptedService::new(vec![Ok(JobState::Complete)]));
        let result = ingestor
            .ingest(Path::new("/nonexistent/file.pdf"), "doc-1", "x")
            .await;
        assert!(matches!(
            result,
            IngestResult::Failed(IngestFailure::LocalIo(_))
        ));
    }

    #[tokio::test]
    async fn batch_ingest_reports_progress_per_item() {
        let dir = TempDir::new().unwrap();
        let items: Vec<IngestItem> = (0..3)
            .map(|i| IngestItem {
                local_path: write_doc(&dir, &format!("doc{i}.txt")),
                document_id: format!("doc-{i}"),
                title: format!("doc {i}"),
            })
            .collect();
        let ingestor = fast_ingestor(ScriptedService::new(vec![
            Ok(JobState::Complete),
            Ok(JobState::Complete),
            Ok(JobState::Complete),
        ]));

        let seen = Mutex::new(Vec::new());
        let results = ingestor
            .batch_ingest(&items, |done, total| {
                seen.lock().unwrap().push((done, total));
            })
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn mime_types_by_extension() {
        assert_eq!(mime_type_for(Path::new("a.pdf")), "application/pdf");
        assert_eq!(mime_type_for(Path::new("a.PDF")), "application/pdf");
        assert_eq!(mime_type_for(Path::new("a.txt")), "text/plain");
        assert_eq!(mime_type_for(Path::new("a.md")), "text/markdown");
        assert_eq!(
            mime_type_for(Path::new("a.unknown")),
            "application/octet-stream"
        );
        assert_eq!(mime_type_for(Path::new("noext")), "application/octet-stream");
    }
}
