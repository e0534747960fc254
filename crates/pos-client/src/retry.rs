//! Retry policy with exponential backoff and jitter.
//!
//! - Exponential backoff, jittered between the base delay and the doubled cap
//! - Respects Retry-After on 429
//! - Only rate limiting and server errors are retried

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info_span, warn, Instrument};

use crate::config::env_or;
use crate::error::ApiResult;
use crate::metrics::record_retry;

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_or("POS_RETRY_MAX_ATTEMPTS", 3),
            base_delay_ms: env_or("POS_RETRY_BASE_MS", 500),
            max_delay_ms: env_or("POS_RETRY_MAX_MS", 5000),
        }
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Execute an async operation with retry.
///
/// Retries on:
/// - HTTP 429 (Too Many Requests) - honors Retry-After
/// - HTTP 5xx (Server errors)
///
/// Everything else, network failures included, is returned after the first
/// attempt. When attempts run out the last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> ApiResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        let span = info_span!("api_retry", operation = %operation, attempt = attempt + 1);

        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let delay = calculate_delay(policy, attempt, e.retry_after_ms());

                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "API call failed, retrying: {}",
                    e
                );

                record_retry(operation);

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Positional form: `max_attempts` total attempts starting at `base_delay_ms`.
pub async fn retry_with<T, F, Fut>(op: F, max_attempts: u32, base_delay_ms: u64) -> ApiResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let policy = RetryPolicy::new(max_attempts, base_delay_ms);
    retry_with_backoff(&policy, "operation", op).await
}

/// Delay before the retry that follows `attempt` (zero-based).
///
/// A server-supplied Retry-After wins outright. Otherwise the delay is drawn
/// uniformly between `min(base, max)` and `min(base * 2^attempt, max)`.
fn calculate_delay(policy: &RetryPolicy, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after);
    }

    let floor = policy.base_delay_ms.min(policy.max_delay_ms);
    let ceiling = policy
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(policy.max_delay_ms);

    if ceiling <= floor {
        return Duration::from_millis(floor);
    }
    Duration::from_millis(rand::rng().random_range(floor..=ceiling))
}

// =============================================================================
// Tests
// =============================================================================
