//! Persisted key-value stores.
//!
//! This crate provides:
//! - The `KeyValueStore` seam used for the secure credential store and the
//!   offline queue store
//! - An in-memory store for tests and ephemeral sessions
//! - A JSON file store that survives process restarts

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{get_json, set_json, KeyValueStore};
