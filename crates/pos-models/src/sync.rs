//! Background sync status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot published to sync listeners after every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// A pass is currently running
    pub is_syncing: bool,
    /// Entries still waiting in the offline queue
    pub pending_count: usize,
    /// When the last pass finished
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Entries replayed successfully in the last pass
    pub success_count: u32,
    /// Entries that failed to replay in the last pass
    pub fail_count: u32,
}

/// Outcome of a single sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub success_count: u32,
    pub fail_count: u32,
}
