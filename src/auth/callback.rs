//! Local HTTP listener for the OAuth redirect.
//!
//! The listener is bound for the lifetime of one authorization attempt and
//! torn down when the [`CallbackListener`] is dropped, whether the flow
//! succeeded or not.

use std::collections::HashMap;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

const SUCCESS_PAGE: &str = "<html><body>\
<h2>Authentication Successful!</h2>\
<p>You can now close this window and return to your application.</p>\
<script>window.close();</script>\
</body></html>";

const FAILURE_PAGE: &str = "<html><body>\
<h2>Authentication Failed!</h2>\
<p>There was an error during authentication. Please try again.</p>\
</body></html>";

/// What the authorization server delivered to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// An authorization code plus the echoed anti-forgery state.
    Code {
        code: String,
        state: Option<String>,
    },
    /// The server reported an error (denied consent, bad request, ...).
    Error(String),
}

#[derive(Clone)]
struct ListenerState {
    tx: mpsc::UnboundedSender<CallbackOutcome>,
}

async fn handle_redirect(
    State(state): State<ListenerState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    if let Some(code) = params.get("code") {
        let _ = state.tx.send(CallbackOutcome::Code {
            code: code.clone(),
            state: params.get("state").cloned(),
        });
        (StatusCode::OK, Html(SUCCESS_PAGE))
    } else if params.contains_key("error") {
        let description = params
            .get("error_description")
            .or_else(|| params.get("error"))
            .cloned()
            .unwrap_or_else(|| "unknown error".to_string());
        let _ = state.tx.send(CallbackOutcome::Error(description));
        (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
    } else {
        (StatusCode::NOT_FOUND, Html(FAILURE_PAGE))
    }
}

/// A one-shot callback listener bound to the redirect URI's port.
pub struct CallbackListener {
    port: u16,
    rx: mpsc::UnboundedReceiver<CallbackOutcome>,
    task: tokio::task::JoinHandle<()>,
}

impl CallbackListener {
    /// Binds the listener on `127.0.0.1:port`, routing the given redirect
    /// path. Port 0 binds an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound (commonly: another
    /// authorization attempt is still running).
    pub async fn bind(port: u16, path: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(path, get(handle_redirect))
            .with_state(ListenerState { tx });

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(Error::Io)?;
        let bound_port = listener.local_addr().map_err(Error::Io)?.port();

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("callback listener error: {e}");
            }
        });

        log::debug!("callback listener bound on 127.0.0.1:{bound_port}{path}");
        Ok(Self {
            port: bound_port,
            rx,
            task,
        })
    }

    /// The port actually bound (useful when binding port 0).
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the redirect to arrive, up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` if no redirect arrives in time or
    /// the listener channel closes.
    pub async fn wait(&mut self, timeout: Duration) -> Result<CallbackOutcome> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Err(Error::Authentication(
                "callback listener closed before a redirect arrived".to_string(),
            )),
            Err(_) => Err(Error::Authentication(
                "authentication timeout - no response received".to_string(),
            )),
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
