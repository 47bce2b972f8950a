//! Error types for the sharefetch library.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during authentication, discovery, or transfer.
#[derive(Error, Debug)]
pub enum Error {
    /// Required configuration is missing or malformed. Not retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The authorization flow or a token refresh failed. The caller must
    /// restart the interactive flow.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Root-level discovery failure against the SharePoint site. Fatal to
    /// the current scan.
    #[error("SharePoint error: {0}")]
    SharePoint(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation cancelled by the user or a supervisor.
    #[error("operation cancelled")]
    Cancelled,
}

/// A specialized `Result` type for sharefetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a per-document failure.
///
/// Document-level failures never abort a bulk operation; they are recorded
/// in the outcome map under this classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The service rejected the caller's authorization for this document.
    PermissionDenied,
    /// The document or its download URL no longer exists.
    NotFound,
    /// A transient network or service failure (including rate limiting).
    Transient,
    /// A remote call exceeded its deadline.
    Timeout,
    /// Writing or renaming the local file failed.
    LocalIo,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth another attempt.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::Transient => "transient failure",
            Self::Timeout => "timeout",
            Self::LocalIo => "local I/O failure",
        };
        f.write_str(s)
    }
}

/// Error surfaced by a remote-service call (document service or indexing
/// service), keeping the service's failure categories distinguishable.
#[derive(Error, Debug)]
pub enum ApiError {
    /// 401/403-equivalent rejection.
    #[error("authorization rejected: {0}")]
    Unauthorized(String),

    /// 404-equivalent.
    #[error("not found: {0}")]
    NotFound(String),

    /// 429-equivalent. Retryable.
    #[error("rate limited by the service")]
    RateLimited {
        /// Server-suggested wait before the next attempt, if any.
        retry_after: Option<Duration>,
    },

    /// The call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Connection-level or 5xx-equivalent failure. Retryable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Any other unexpected status.
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
}

impl ApiError {
    /// Classifies an HTTP status into a service error category.
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(message),
            404 | 410 => Self::NotFound(message),
            408 => Self::Timeout,
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Transient(message),
            _ => Self::Status { status, message },
        }
    }

    /// Collapses this error into the per-document failure classification.
    ///
    /// Rate limiting stays distinguishable here but is recorded as
    /// `Transient` in outcomes, since both share the same retry treatment.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout => ErrorKind::Timeout,
            Self::RateLimited { .. } | Self::Transient(_) | Self::Status { .. } => {
                ErrorKind::Transient
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transient(e.to_string())
        }
    }
}

/// A specialized `Result` for remote-service calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ApiError::from_status(403, String::new()),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            ApiError::from_status(404, String::new()),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from_status(429, String::new()),
            ApiError::RateLimited { .. }
        ));
        assert!(matches!(
            ApiError::from_status(503, String::new()),
            ApiError::Transient(_)
        ));
        assert!(matches!(
            ApiError::from_status(418, String::new()),
            ApiError::Status { status: 418, .. }
        ));
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::PermissionDenied.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::LocalIo.is_retryable());
    }

    #[test]
    fn rate_limit_collapses_to_transient() {
        let e = ApiError::from_status(429, String::new());
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn unauthorized_is_permission_denied() {
        let e = ApiError::from_status(401, "no".to_string());
        assert_eq!(e.kind(), ErrorKind::PermissionDenied);
    }
}
