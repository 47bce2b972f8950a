//! Interactive delegated authorization (authorization-code + proof-key).
//!
//! [`AuthSession`] drives the browser-mediated flow: it generates the
//! proof-key pair and anti-forgery state, hosts the local callback listener
//! for the redirect, exchanges the authorization code for tokens, and keeps
//! the resulting credential refreshed for the process lifetime. Multi-factor
//! challenges happen entirely inside the browser-hosted flow; locally only
//! "completed with tokens" vs "failed" is distinguished.

pub mod callback;
pub mod pkce;
pub mod token;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

pub use callback::{CallbackListener, CallbackOutcome};
pub use pkce::{PkceChallenge, generate_pkce, generate_state};
pub use token::{Credential, TokenRefresher, TokenStore};

/// How long to wait for the user to finish signing in.
const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(300);

/// Where the authorization flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NotStarted,
    AwaitingRedirect,
    Exchanging,
    Authenticated,
    Refreshing,
    Failed,
}

/// An in-flight authorization attempt produced by [`AuthSession::begin`].
///
/// Owns the callback listener; dropping the request (on any path out of
/// [`AuthSession::complete`]) tears the listener down.
pub struct AuthorizationRequest {
    /// URL the user must open in a browser to sign in.
    pub authorize_url: String,
    state_token: String,
    verifier: String,
    listener: CallbackListener,
}

impl AuthorizationRequest {
    /// The port the callback listener is bound to.
    #[must_use]
    pub const fn listener_port(&self) -> u16 {
        self.listener.port()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Drives the interactive authorization flow and token refreshes.
pub struct AuthSession {
    config: AuthConfig,
    http: reqwest::Client,
    state: Mutex<AuthState>,
    flow_timeout: Duration,
}

impl AuthSession {
    /// Creates a session for the given auth configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the client id or redirect URI is
    /// malformed.
    pub fn new(config: AuthConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            config,
            http,
            state: Mutex::new(AuthState::NotStarted),
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
        })
    }

    /// Overrides how long [`complete`](Self::complete) waits for the
    /// redirect.
    #[must_use]
    pub const fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self
    }

    /// The current flow state.
    pub fn state(&self) -> AuthState {
        *self.state.lock().expect("auth state lock poisoned")
    }

    fn set_state(&self, next: AuthState) {
        *self.state.lock().expect("auth state lock poisoned") = next;
    }

    /// Starts an authorization attempt: generates the proof-key pair and
    /// state token, binds the callback listener, and builds the
    /// authorization URL for the user to open.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for malformed settings, or an I/O
    /// error if the callback port cannot be bound.
    pub async fn begin(&self) -> Result<AuthorizationRequest> {
        self.config.validate()?;
        let port = self.config.redirect_port()?;
        let path = self.config.redirect_path();

        let pkce = generate_pkce();
        let state_token = generate_state();
        let listener = CallbackListener::bind(port, &path).await?;

        let scopes = self.config.scopes.join(" ");
        let authorize_url = reqwest::Url::parse_with_params(
            &format!("{}/authorize", self.config.authority()),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scopes.as_str()),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", state_token.as_str()),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| Error::Configuration(format!("cannot build authorization URL: {e}")))?
        .to_string();

        self.set_state(AuthState::AwaitingRedirect);
        log::info!("authorization flow started, awaiting redirect on port {port}");

        Ok(AuthorizationRequest {
            authorize_url,
            state_token,
            verifier: pkce.verifier,
            listener,
        })
    }

    /// Waits for the redirect, verifies the anti-forgery state, and
    /// exchanges the authorization code for tokens.
    ///
    /// Consumes the request; its callback listener is torn down on every
    /// path out of this function.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` on state mismatch, a rejected or
    /// expired code, denied consent, or timeout.
    pub async fn complete(&self, request: AuthorizationRequest) -> Result<Credential> {
        let AuthorizationRequest {
            state_token,
            verifier,
            mut listener,
            ..
        } = request;

        let outcome = match listener.wait(self.flow_timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_state(AuthState::Failed);
                return Err(e);
            }
        };
        drop(listener);

        let code = match outcome {
            CallbackOutcome::Code { code, state } => {
                if state.as_deref() != Some(state_token.as_str()) {
                    self.set_state(AuthState::Failed);
                    return Err(Error::Authentication(
                        "state token mismatch in redirect (possible replay)".to_string(),
                    ));
                }
                code
            }
            CallbackOutcome::Error(description) => {
                self.set_state(AuthState::Failed);
                return Err(Error::Authentication(format!(
                    "authorization rejected: {description}"
                )));
            }
        };

        self.set_state(AuthState::Exchanging);
        let credential = self
            .exchange(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", verifier.as_str()),
            ])
            .await;

        match credential {
            Ok(credential) => {
                self.set_state(AuthState::Authenticated);
                log::info!("authorization flow completed");
                Ok(credential)
            }
            Err(e) => {
                self.set_state(AuthState::Failed);
                Err(e)
            }
        }
    }

    /// Exchanges a refresh token for a new credential.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` if the credential has no refresh
    /// token or the service rejects it; the caller must restart the
    /// interactive flow.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            self.set_state(AuthState::Failed);
            return Err(Error::Authentication(
                "credential has no refresh token".to_string(),
            ));
        };

        self.set_state(AuthState::Refreshing);
        let result = self
            .exchange(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await;

        match result {
            Ok(mut refreshed) => {
                // The service may omit a rotated refresh token; keep the old one.
                if refreshed.refresh_token.is_none() {
                    refreshed.refresh_token = credential.refresh_token.clone();
                }
                self.set_state(AuthState::Authenticated);
                log::debug!("access token refreshed");
                Ok(refreshed)
            }
            Err(e) => {
                self.set_state(AuthState::Failed);
                Err(e)
            }
        }
    }

    /// Posts a token-grant request and parses the response.
    async fn exchange(&self, grant_params: &[(&str, &str)]) -> Result<Credential> {
        let token_url = format!("{}/token", self.config.authority());
        let token_scopes: Vec<&str> = self
            .config
            .scopes
            .iter()
            .map(String::as_str)
            .filter(|s| *s != "offline_access")
            .collect();
        let scope = token_scopes.join(" ");

        let mut params: Vec<(&str, &str)> = grant_params.to_vec();
        params.push(("scope", scope.as_str()));
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<TokenErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.error_description.or(e.error))
                .unwrap_or_else(|| format!("status {status}"));
            return Err(Error::Authentication(format!(
                "token exchange rejected: {detail}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("malformed token response: {e}")))?;

        Ok(Credential {
            access_token: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
            refresh_token: token.refresh_token,
            scopes: token
                .scope
                .map(|s| s.split_whitespace().map(ToString::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl TokenRefresher for AuthSession {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        Self::refresh(self, credential).await
    }
}
