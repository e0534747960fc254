//! Offline queue metrics.

use metrics::{counter, gauge, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Entries waiting in the offline queue.
    pub const QUEUE_DEPTH: &str = "pos_offline_queue_depth";

    /// Replayed entries by outcome.
    pub const REPLAYS_TOTAL: &str = "pos_offline_replays_total";

    /// Completed sync passes.
    pub const SYNC_PASSES_TOTAL: &str = "pos_offline_sync_passes_total";

    /// Sync pass duration in seconds.
    pub const SYNC_DURATION_SECONDS: &str = "pos_offline_sync_duration_seconds";
}

pub fn record_queue_depth(depth: usize) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

pub fn record_replay(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(names::REPLAYS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_sync_pass(duration_ms: f64) {
    counter!(names::SYNC_PASSES_TOTAL).increment(1);
    histogram!(names::SYNC_DURATION_SECONDS).record(duration_ms / 1000.0);
}
