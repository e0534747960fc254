//! Access layer error types.

use thiserror::Error;

use pos_client::ApiError;
use pos_models::HttpMethod;
use pos_offline::OfflineError;
use pos_storage::StorageError;

pub type AccessResult<T> = Result<T, AccessError>;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A mutation could neither be sent nor queued.
    #[error(transparent)]
    Offline(#[from] OfflineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// `write` was handed a read.
    #[error("Not a mutation: {method} {path}")]
    NotAMutation { method: HttpMethod, path: String },
}

impl AccessError {
    /// The user has to log in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            AccessError::Api(ApiError::SessionExpired(_) | ApiError::TenantClaim(_))
        )
    }

    /// The underlying API error, if this is one.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            AccessError::Api(e) => Some(e),
            _ => None,
        }
    }
}
