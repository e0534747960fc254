//! In-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageResult;
use crate::store::KeyValueStore;

/// Volatile store; contents are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        let mut map = self.entries.write().await;
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        let mut map = self.entries.write().await;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}
