//! Online/offline flag.
//!
//! The host platform owns network detection and reports changes through
//! [`ConnectivityMonitor::set_online`]; everything here just observes it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared connectivity state. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current state. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
