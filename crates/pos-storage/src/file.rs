//! JSON file store.
//!
//! The whole map lives in one file that is rewritten on every mutation
//! (write to a sibling temp file, then rename). The data set is a handful of
//! credential keys plus the offline queue, so a full rewrite is cheap.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;

/// Persisted store backed by a single JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create on first write) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::Corrupt(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };

        debug!(path = %path.display(), keys = entries.len(), "Opened file store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `mutate` and persist; the in-memory copy is restored if the
    /// write fails so memory never runs ahead of disk.
    async fn mutate<F>(&self, mutate: F) -> StorageResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut entries = self.entries.lock().await;
        let previous = entries.clone();
        mutate(&mut entries);

        if let Err(e) = self.persist(&entries).await {
            warn!(path = %self.path.display(), error = %e, "File store write failed");
            *entries = previous;
            return Err(StorageError::write_failed(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|map| {
            map.insert(key.to_string(), value.to_string());
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.mutate(|map| {
            map.remove(key);
        })
        .await
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        self.mutate(|map| {
            for (key, value) in entries {
                map.insert(key.to_string(), value.to_string());
            }
        })
        .await
    }

    async fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        self.mutate(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
        .await
    }
}
