//! Offline sync configuration.

use std::time::Duration;

/// Store key holding the queue document.
pub const DEFAULT_QUEUE_KEY: &str = "offline.queue";

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Time between background sync passes
    pub sync_interval: Duration,
    /// Key of the queue document in the queue store
    pub queue_key: String,
    /// How long `stop_sync` waits for a running pass before aborting it
    pub shutdown_timeout: Duration,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl OfflineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let sync_interval_secs: u64 = std::env::var("POS_SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(30);

        Self {
            sync_interval: Duration::from_secs(sync_interval_secs),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_sync_interval_from_env() {
        std::env::set_var("POS_SYNC_INTERVAL_SECS", "45");
        assert_eq!(OfflineConfig::from_env().sync_interval, Duration::from_secs(45));

        // Zero would spin the loop
        std::env::set_var("POS_SYNC_INTERVAL_SECS", "0");
        assert_eq!(OfflineConfig::from_env().sync_interval, Duration::from_secs(30));

        std::env::remove_var("POS_SYNC_INTERVAL_SECS");
        assert_eq!(OfflineConfig::from_env().queue_key, "offline.queue");
    }
}
