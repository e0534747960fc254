//! Shared data models for the POS API access layer.
//!
//! This crate provides Serde-serializable types for:
//! - Persisted credentials and token claims
//! - Offline queue entries and HTTP methods
//! - Background sync status snapshots
//! - Normalization of the backend's list response shapes
//! - Product payloads used by the example resource services

pub mod product;
pub mod request;
pub mod shape;
pub mod sync;
pub mod token;

// Re-export common types
pub use product::{NewProduct, Product, ProductCount};
pub use request::{HttpMethod, NewPendingRequest, PendingRequest, PendingRequestId};
pub use shape::{normalize_list, ListResponse};
pub use sync::{SyncReport, SyncStatus};
pub use token::{LoginResponse, RefreshResponse, TokenClaims, TokenRecord, UserSnapshot};
