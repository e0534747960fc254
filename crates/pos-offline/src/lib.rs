//! Offline mutation queue and background sync.
//!
//! This crate provides:
//! - A persisted FIFO queue of mutations made while offline
//! - A connectivity flag fed by the host platform
//! - A sync scheduler replaying the queue through a `Replayer`

pub mod config;
pub mod connectivity;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod sync;

pub use config::OfflineConfig;
pub use connectivity::ConnectivityMonitor;
pub use error::{OfflineError, OfflineResult};
pub use queue::OfflineQueue;
pub use sync::{Replayer, Subscription, SyncScheduler};
