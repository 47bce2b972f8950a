//! Credential storage with single-flight refresh.
//!
//! The [`TokenStore`] is the only shared mutable state in the pipeline.
//! Every outbound call authenticates through [`TokenStore::get_auth_headers`];
//! no other component reads raw token fields.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Safety margin subtracted from a credential's lifetime before it is
/// considered expired.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 120;

/// An access credential obtained from the delegated authorization flow.
///
/// Never persisted across runs; replaced in place by a refresh.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Opaque bearer token.
    pub access_token: String,
    /// Instant after which the token must not be presented downstream.
    pub expires_at: DateTime<Utc>,
    /// Refresh material, when the service granted `offline_access`.
    pub refresh_token: Option<String>,
    /// Scopes granted to this credential.
    pub scopes: Vec<String>,
}

impl Credential {
    /// Whether the credential expires within the given margin from now.
    #[must_use]
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(margin_secs) >= self.expires_at
    }
}

/// Source of refreshed credentials; implemented by `AuthSession`.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges the credential's refresh material for a new credential.
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;
}

/// Holds the current credential and answers "is valid" / "refresh now"
/// queries for all concurrent workers.
pub struct TokenStore {
    credential: Mutex<Credential>,
    refresher: Arc<dyn TokenRefresher>,
    safety_margin_secs: i64,
}

impl TokenStore {
    /// Creates a store seeded with an initial credential.
    #[must_use]
    pub fn new(initial: Credential, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            credential: Mutex::new(initial),
            refresher,
            safety_margin_secs: DEFAULT_SAFETY_MARGIN_SECS,
        }
    }

    /// Overrides the expiry safety margin.
    #[must_use]
    pub const fn with_safety_margin_secs(mut self, secs: i64) -> Self {
        self.safety_margin_secs = secs;
        self
    }

    /// Returns a credential guaranteed valid past the safety margin,
    /// refreshing first when needed.
    ///
    /// Concurrent callers that detect expiry at the same time collapse into
    /// a single refresh call: the refresh happens while the credential lock
    /// is held, so later callers observe the fresh credential and return
    /// without issuing a second refresh.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` if the refresh is rejected; the
    /// caller must restart the interactive flow.
    pub async fn get_valid(&self) -> Result<Credential> {
        let mut guard = self.credential.lock().await;
        if !guard.expires_within(self.safety_margin_secs) {
            return Ok(guard.clone());
        }
        log::debug!("access token near expiry, refreshing");
        let refreshed = self.refresher.refresh(&guard).await?;
        *guard = refreshed.clone();
        Ok(refreshed)
    }

    /// Derives the bearer headers for an authenticated request.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` if no valid credential can be
    /// obtained or the token is not a valid header value.
    pub async fn get_auth_headers(&self) -> Result<HeaderMap> {
        let credential = self.get_valid().await?;
        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", credential.access_token)).map_err(
                |_| Error::Authentication("access token is not a valid header value".to_string()),
            )?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn credential(token: &str, expires_in_secs: i64) -> Credential {
        Credential {
            access_token: token.to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            refresh_token: Some("refresh".to_string()),
            scopes: vec!["Sites.Read.All".to_string()],
        }
    }

    struct CountingRefresher {
        calls: AtomicUsize,
    }

    impl CountingRefresher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _credential: &Credential) -> Result<Credential> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Give concurrent callers time to pile up on the lock.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(credential("refreshed", 3600))
        }
    }

    struct FailingRefresher;

    #[async_trait]
    impl TokenRefresher for FailingRefresher {
        async fn refresh(&self, _credential: &Credential) -> Result<Credential> {
            Err(Error::Authentication("refresh token expired".to_string()))
        }
    }

    #[tokio::test]
    async fn valid_credential_passes_through() {
        let refresher = Arc::new(CountingRefresher::new());
        let store = TokenStore::new(credential("fresh", 3600), refresher.clone());

        let got = store.get_valid().await.unwrap();
        assert_eq!(got.access_token, "fresh");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_credential_triggers_refresh() {
        let refresher = Arc::new(CountingRefresher::new());
        let store = TokenStore::new(credential("stale", -10), refresher.clone());

        let got = store.get_valid().await.unwrap();
        assert_eq!(got.access_token, "refreshed");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn margin_counts_as_expired() {
        let refresher = Arc::new(CountingRefresher::new());
        // Expires in 30s, margin is 120s: must refresh.
        let store = TokenStore::new(credential("stale", 30), refresher.clone());

        let got = store.get_valid().await.unwrap();
        assert_eq!(got.access_token, "refreshed");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_refresh() {
        let refresher = Arc::new(CountingRefresher::new());
        let store = Arc::new(TokenStore::new(
            credential("stale", -10),
            refresher.clone(),
        ));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get_valid().await })
            })
            .collect();

        for task in tasks {
            let got = task.await.unwrap().unwrap();
            assert_eq!(got.access_token, "refreshed");
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_is_authentication_error() {
        let store = TokenStore::new(credential("stale", -10), Arc::new(FailingRefresher));
        assert!(matches!(
            store.get_valid().await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn auth_headers_carry_bearer_token() {
        let refresher = Arc::new(CountingRefresher::new());
        let store = TokenStore::new(credential("tok-abc", 3600), refresher);

        let headers = store.get_auth_headers().await.unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer tok-abc");
        assert_eq!(headers[ACCEPT], "application/json");
        assert!(headers[AUTHORIZATION].is_sensitive());
    }
}
