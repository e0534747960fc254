//! Authenticated request pipeline.
//!
//! Every backend call goes through [`RequestPipeline::send`]:
//! - Attaches the bearer token and caller headers
//! - Refreshes ahead of expiry, and once on 401 via the shared coordinator
//! - Clears the session when credentials turn out to be unusable
//! - Maps responses onto the [`ApiError`] taxonomy

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use pos_models::{HttpMethod, PendingRequest};

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics::record_request;
use crate::refresh::RefreshCoordinator;
use crate::token_store::TokenStore;

/// Calls that never carry a bearer token and never trigger a refresh.
pub const AUTH_EXEMPT_PATHS: &[&str] = &["/auth/login", "/auth/signup", "/auth/register", "/auth/refresh"];

pub const CALLER_ID_HEADER: &str = "X-Caller-Id";
pub const REQUEST_TIMESTAMP_HEADER: &str = "X-Request-Timestamp";

/// Whether `path` is a login/signup/refresh call.
pub fn is_auth_exempt(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or_default();
    let path = path.trim_end_matches('/');
    AUTH_EXEMPT_PATHS
        .iter()
        .any(|exempt| path == *exempt || path == exempt.trim_start_matches('/'))
}

/// Caller identity: the signed-in user's id, else the configured client id.
pub(crate) async fn caller_id(tokens: &TokenStore, client_id: &str) -> String {
    match tokens.user().await {
        Some(user) if !user.id.is_empty() => user.id,
        _ => client_id.to_string(),
    }
}

/// Attach the headers every outbound call carries, refresh calls included.
pub(crate) fn with_standard_headers(builder: RequestBuilder, caller_id: String) -> RequestBuilder {
    builder
        .header(CONTENT_TYPE, "application/json")
        .header(CALLER_ID_HEADER, caller_id)
        .header(REQUEST_TIMESTAMP_HEADER, Utc::now().timestamp_millis().to_string())
}

// =============================================================================
// Request
// =============================================================================

/// One backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the base URL, e.g. `/products/42`
    pub path: String,
    pub body: Option<Value>,
    /// Extra headers, applied after the standard ones
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: BTreeMap::new(),
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Rebuild the call a queued mutation stands for.
    pub fn from_pending(pending: &PendingRequest) -> Self {
        Self {
            method: pending.method,
            path: pending.endpoint.clone(),
            body: pending.payload.clone(),
            headers: pending.headers.clone(),
            query: pending.query.clone(),
        }
    }
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// `Retry-After` in seconds, as milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

// =============================================================================
// Pipeline
// =============================================================================

/// HTTP wrapper shared by every resource service.
pub struct RequestPipeline {
    http: Client,
    config: ClientConfig,
    tokens: Arc<TokenStore>,
    refresher: RefreshCoordinator,
}

impl RequestPipeline {
    pub fn new(config: ClientConfig, tokens: Arc<TokenStore>) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("pos-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::config(format!("Failed to build HTTP client: {}", e)))?;

        let refresher = RefreshCoordinator::new(
            Arc::clone(&tokens),
            http.clone(),
            config.url("/auth/refresh"),
            config.client_id.clone(),
        );

        Ok(Self {
            http,
            config,
            tokens,
            refresher,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Send a call and deserialize the JSON response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> ApiResult<T> {
        let value = self.send(request).await?;
        serde_json::from_value(value).map_err(ApiError::from)
    }

    /// Send a call. An empty success body yields `Value::Null`.
    pub async fn send(&self, request: &ApiRequest) -> ApiResult<Value> {
        let span = info_span!("api_request", method = %request.method, path = %request.path);

        let start = Instant::now();
        let result = self.send_with_recovery(request).instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(0),
        };
        record_request(request.method.as_str(), status, latency_ms);

        result
    }

    async fn send_with_recovery(&self, request: &ApiRequest) -> ApiResult<Value> {
        let exempt = is_auth_exempt(&request.path);
        let mut token = if exempt { None } else { self.current_token().await? };
        let mut retried = false;

        loop {
            let err = match self.dispatch(request, token.as_deref()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err {
                ApiError::TenantClaim(ref message) if !exempt => {
                    warn!(message = %message, "Backend rejected stored credentials, clearing session");
                    self.tokens.clear_auth_data().await;
                    return Err(err);
                }
                ApiError::Unauthorized(_) if exempt => return Err(err),
                ApiError::Unauthorized(message) if retried => {
                    warn!("Still unauthorized after refresh, clearing session");
                    self.tokens.clear_auth_data().await;
                    return Err(ApiError::SessionExpired(message));
                }
                ApiError::Unauthorized(_) => {
                    retried = true;
                    token = Some(self.recover_token(token.as_deref()).await?);
                    debug!("Retrying with refreshed token");
                }
                other => return Err(other),
            }
        }
    }

    /// Token to attach to a fresh call, refreshing first when it is about to
    /// expire. A refresh that gets no response keeps the session and sends
    /// with the current token.
    async fn current_token(&self) -> ApiResult<Option<String>> {
        if self.tokens.is_token_expired().await && self.tokens.get_refresh_token().await.is_some() {
            debug!("Access token inside expiry buffer, refreshing before sending");
            match self.refresher.refresh().await {
                Ok(token) => return Ok(Some(token)),
                Err(e) if e.is_network() => {
                    warn!(error = %e, "Early refresh got no response, sending with current token");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.tokens.get_access_token().await)
    }

    /// Token to retry a 401 with. If another caller already replaced the
    /// token this request carried, that one is used without a new refresh.
    async fn recover_token(&self, sent: Option<&str>) -> ApiResult<String> {
        if let Some(stored) = self.tokens.get_access_token().await {
            if sent != Some(stored.as_str()) {
                debug!("Access token changed while request was in flight");
                return Ok(stored);
            }
        }

        match self.refresher.refresh().await {
            Err(e) if e.is_network() => {
                warn!(error = %e, "Refresh after 401 got no response, clearing session");
                self.tokens.clear_auth_data().await;
                Err(e)
            }
            other => other,
        }
    }

    /// One round trip, no recovery.
    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> ApiResult<Value> {
        let url = self.config.url(&request.path);

        let caller = caller_id(&self.tokens, &self.config.client_id).await;
        let mut builder = with_standard_headers(self.http.request(reqwest_method(request.method), &url), caller);

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(ApiError::from);
        }

        let retry_after_ms = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), url = %url, "Request failed");

        Err(ApiError::from_response(status.as_u16(), &body, retry_after_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_exempt_paths() {
        assert!(is_auth_exempt("/auth/login"));
        assert!(is_auth_exempt("auth/refresh"));
        assert!(is_auth_exempt("/auth/signup?ref=qr"));
        assert!(!is_auth_exempt("/auth/me"));
        assert!(!is_auth_exempt("/products"));
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(2000));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_request_from_pending() {
        let pending = pos_models::NewPendingRequest::new(HttpMethod::Post, "/products")
            .with_payload(json!({"name": "Tea"}))
            .with_header("X-Idempotency-Key", "abc")
            .with_query("store", "main & annex")
            .into_pending(4);

        let request = ApiRequest::from_pending(&pending);
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "/products");
        assert_eq!(request.body, Some(json!({"name": "Tea"})));
        assert_eq!(request.headers.get("X-Idempotency-Key").map(String::as_str), Some("abc"));
        assert_eq!(request.query, vec![("store".to_string(), "main & annex".to_string())]);
    }
}
