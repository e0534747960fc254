//! Access layer configuration.

use std::path::PathBuf;

use pos_client::{ApiResult, ClientConfig};
use pos_offline::OfflineConfig;

/// File holding the credential keys inside the state directory.
pub const SECURE_STORE_FILE: &str = "secure-store.json";

/// File holding the offline queue inside the state directory.
pub const QUEUE_STORE_FILE: &str = "offline-queue.json";

/// Full configuration of the access layer.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub client: ClientConfig,
    pub offline: OfflineConfig,
    /// Directory for persisted state. In-memory stores are used when unset.
    pub state_dir: Option<PathBuf>,
}

impl AccessConfig {
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            offline: OfflineConfig::default(),
            state_dir: None,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ApiResult<Self> {
        Ok(Self {
            client: ClientConfig::from_env()?,
            offline: OfflineConfig::from_env(),
            state_dir: std::env::var("POS_STATE_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }
}
