//! Resilient API access layer for the POS client.
//!
//! Resource services call [`AccessLayer`] instead of the backend directly. It
//! combines the authenticated pipeline, read caching and deduplication, and
//! the offline queue into one object with an explicit lifecycle:
//!
//! ```no_run
//! # async fn run() -> Result<(), pos_access::AccessError> {
//! use std::sync::Arc;
//! use pos_access::{AccessConfig, AccessLayer, ProductService};
//! use pos_offline::ConnectivityMonitor;
//!
//! let layer = Arc::new(AccessLayer::open(AccessConfig::from_env()?, ConnectivityMonitor::default()).await?);
//! layer.init().await?;
//!
//! let products = ProductService::new(Arc::clone(&layer));
//! let count = products.count().await?;
//!
//! layer.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod layer;
pub mod replay;
pub mod services;
pub mod telemetry;

pub use config::AccessConfig;
pub use error::{AccessError, AccessResult};
pub use layer::{AccessLayer, ReadRequest, WriteOutcome};
pub use replay::PipelineReplayer;
pub use services::{DashboardService, ProductService};
