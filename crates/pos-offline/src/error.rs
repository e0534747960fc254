//! Offline queue error types.

use thiserror::Error;

pub type OfflineResult<T> = Result<T, OfflineError>;

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    /// A queued mutation was rejected on replay. The entry stays queued.
    #[error("Replay failed: {0}")]
    ReplayFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] pos_storage::StorageError),
}

impl OfflineError {
    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn replay_failed(msg: impl Into<String>) -> Self {
        Self::ReplayFailed(msg.into())
    }
}
