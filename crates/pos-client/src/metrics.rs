//! API access metrics.
//!
//! Provides standardized metrics for monitoring the access layer:
//! - Request counters by method and status
//! - Latency histograms
//! - Retry, refresh, cache and dedup counters

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Total backend requests by method and status.
    pub const REQUESTS_TOTAL: &str = "pos_api_requests_total";

    /// Request latency in seconds by method.
    pub const LATENCY_SECONDS: &str = "pos_api_latency_seconds";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "pos_api_retries_total";

    /// Token refreshes by outcome.
    pub const REFRESHES_TOTAL: &str = "pos_api_token_refreshes_total";

    /// Cache lookups by result (hit/miss).
    pub const CACHE_LOOKUPS_TOTAL: &str = "pos_api_cache_lookups_total";

    /// Reads that joined an in-flight identical read.
    pub const DEDUP_JOINS_TOTAL: &str = "pos_api_dedup_joins_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record metrics for a completed backend request.
pub fn record_request(method: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "method" => method.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a token refresh outcome.
pub fn record_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(names::REFRESHES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a cache lookup.
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(names::CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}

/// Record a read joining an in-flight call.
pub fn record_dedup_join() {
    counter!(names::DEDUP_JOINS_TOTAL).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
