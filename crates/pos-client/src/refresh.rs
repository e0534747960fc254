//! Single-flight token refresh.
//!
//! The first caller to need a new access token starts the refresh; everyone
//! arriving while it runs parks a continuation and receives the same outcome.
//! The refresh itself runs in a spawned task, so a caller being cancelled
//! never leaves the coordinator stuck in `Refreshing`.

use std::sync::Arc;

use reqwest::Client;
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

use pos_models::RefreshResponse;

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_refresh;
use crate::pipeline::{caller_id, with_standard_headers};
use crate::token_store::TokenStore;

type Waiter = oneshot::Sender<ApiResult<String>>;

/// Coordination state. Reset to `Idle` with no waiters once a refresh settles.
enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

struct Inner {
    state: Mutex<RefreshState>,
    tokens: Arc<TokenStore>,
    http: Client,
    refresh_url: String,
    client_id: String,
}

/// Runs at most one refresh call at a time.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        tokens: Arc<TokenStore>,
        http: Client,
        refresh_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                tokens,
                http,
                refresh_url: refresh_url.into(),
                client_id: client_id.into(),
            }),
        }
    }

    /// Obtain a fresh access token, joining a refresh already in progress.
    pub async fn refresh(&self) -> ApiResult<String> {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut state = self.inner.state.lock().await;
            if let RefreshState::Refreshing { waiters } = &mut *state {
                waiters.push(tx);
                debug!(waiting = waiters.len(), "Joining in-progress token refresh");
                false
            } else {
                *state = RefreshState::Refreshing { waiters: vec![tx] };
                true
            }
        };

        if leader {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.run().instrument(info_span!("token_refresh")));
        }

        rx.await
            .unwrap_or_else(|_| Err(ApiError::session_expired("Token refresh was abandoned")))
    }

    /// Whether a refresh is running right now.
    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock().await, RefreshState::Refreshing { .. })
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let result = self.exchange().await;
        record_refresh(result.is_ok());

        match &result {
            Ok(_) => info!("Access token refreshed"),
            // No verdict from the backend; callers decide what that means
            Err(e) if e.is_network() => warn!(error = %e, "Token refresh got no response"),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.tokens.clear_auth_data().await;
            }
        }

        let waiters = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        for waiter in waiters {
            // A waiter that went away no longer needs the token
            let _ = waiter.send(result.clone());
        }
    }

    async fn exchange(&self) -> ApiResult<String> {
        let refresh_token = self
            .tokens
            .get_refresh_token()
            .await
            .ok_or_else(|| ApiError::session_expired("No refresh token available"))?;

        let caller = caller_id(&self.tokens, &self.client_id).await;
        let response = with_standard_headers(self.http.post(&self.refresh_url), caller)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::session_expired(format!(
                "Refresh rejected ({}): {}",
                status.as_u16(),
                body
            )));
        }

        let refreshed: RefreshResponse = response.json().await?;
        if refreshed.access_token.is_empty() {
            return Err(ApiError::invalid_response("Refresh returned an empty access token"));
        }

        self.tokens
            .update_access_token(&refreshed.access_token, refreshed.expires_in)
            .await?;

        Ok(refreshed.access_token)
    }
}
