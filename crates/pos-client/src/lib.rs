//! Authenticated client for the POS backend.
//!
//! This crate provides:
//! - Persisted token management with local claim validation
//! - A request pipeline with single-flight refresh on 401
//! - Retry with exponential backoff for rate limiting and server errors
//! - In-flight deduplication of identical reads
//! - A TTL response cache with namespace invalidation

pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod refresh;
pub mod retry;
pub mod token_store;

#[cfg(test)]
mod pipeline_tests;

pub use cache::{CacheManager, CacheNamespace, ResponseCache};
pub use config::ClientConfig;
pub use dedup::Deduplicator;
pub use error::{ApiError, ApiResult, NetworkDiagnosis, NetworkFailureKind};
pub use pipeline::{is_auth_exempt, ApiRequest, RequestPipeline};
pub use refresh::RefreshCoordinator;
pub use retry::{retry_with, retry_with_backoff, RetryPolicy};
pub use token_store::TokenStore;
