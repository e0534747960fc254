//! Client configuration.

use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::retry::RetryPolicy;

/// Default TTL for cached reads.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default age after which an in-flight dedup entry is considered stuck.
pub const DEFAULT_DEDUP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Caller identity used before a user has signed in
    pub client_id: String,
    /// Retry configuration for reads
    pub retry: RetryPolicy,
    /// TTL for cached reads
    pub cache_ttl: Duration,
    /// Staleness window for in-flight dedup entries
    pub dedup_timeout: Duration,
}

impl ClientConfig {
    /// Config with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            client_id: "pos-device".to_string(),
            retry: RetryPolicy::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            dedup_timeout: DEFAULT_DEDUP_TIMEOUT,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ApiResult<Self> {
        let base_url = std::env::var("POS_API_BASE_URL")
            .map_err(|_| ApiError::config("POS_API_BASE_URL must be set"))?;

        if base_url.trim().is_empty() {
            return Err(ApiError::config("POS_API_BASE_URL cannot be empty"));
        }

        let mut config = Self::new(base_url.trim());

        config.timeout = Duration::from_secs(env_or("POS_HTTP_TIMEOUT_SECS", 30));
        config.connect_timeout = Duration::from_secs(env_or("POS_CONNECT_TIMEOUT_SECS", 5));
        if let Ok(client_id) = std::env::var("POS_CLIENT_ID") {
            if !client_id.trim().is_empty() {
                config.client_id = client_id;
            }
        }
        config.retry = RetryPolicy::from_env();
        config.cache_ttl = Duration::from_millis(env_or("POS_CACHE_TTL_MS", 30_000));
        config.dedup_timeout = Duration::from_secs(env_or("POS_DEDUP_TIMEOUT_SECS", 30));

        Ok(config)
    }

    /// Absolute URL for a path relative to the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

pub(crate) fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
