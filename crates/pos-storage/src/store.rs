//! The key-value store seam.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageResult;

/// A persisted string key-value store with a single writer (the running app).
///
/// Implementations must make each call durable before returning; callers
/// treat a returned `Ok` as "survives a restart".
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Write several values as one group.
    async fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }

    /// Delete several values as one group.
    async fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// Read and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}
