//! Persisted FIFO queue of offline mutations.
//!
//! The whole queue lives under one store key as `{nextSeq, entries}`. An
//! in-memory mirror is loaded on first use and every mutation is written
//! through before the mirror changes, so a failed write leaves both sides as
//! they were.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pos_models::{NewPendingRequest, PendingRequest, PendingRequestId};
use pos_storage::{get_json, set_json, KeyValueStore};

use crate::config::DEFAULT_QUEUE_KEY;
use crate::error::{OfflineError, OfflineResult};
use crate::metrics::record_queue_depth;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueDocument {
    next_seq: u64,
    entries: Vec<PendingRequest>,
}

#[derive(Default)]
struct QueueState {
    loaded: bool,
    doc: QueueDocument,
}

/// Offline mutation queue.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    state: Mutex<QueueState>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, DEFAULT_QUEUE_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Load persisted entries. Returns how many are pending.
    pub async fn init(&self) -> OfflineResult<usize> {
        let mut state = self.state.lock().await;
        self.load(&mut state).await?;
        Ok(state.doc.entries.len())
    }

    /// Append a mutation. Fails only if it could not be persisted.
    pub async fn enqueue(&self, request: NewPendingRequest) -> OfflineResult<PendingRequest> {
        let mut state = self.state.lock().await;
        self.load(&mut state)
            .await
            .map_err(|e| OfflineError::enqueue_failed(e.to_string()))?;

        let mut doc = state.doc.clone();
        let pending = request.into_pending(doc.next_seq);
        doc.next_seq += 1;
        doc.entries.push(pending.clone());

        self.persist(&doc)
            .await
            .map_err(|e| OfflineError::enqueue_failed(e.to_string()))?;
        state.doc = doc;

        info!(
            id = %pending.id,
            method = %pending.method,
            endpoint = %pending.endpoint,
            pending = state.doc.entries.len(),
            "Queued offline mutation"
        );
        Ok(pending)
    }

    pub async fn size(&self) -> usize {
        self.read(|doc| doc.entries.len()).await
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Oldest entry.
    pub async fn get_next(&self) -> Option<PendingRequest> {
        self.read(|doc| doc.entries.first().cloned()).await
    }

    /// Oldest entry queued after `seq`.
    pub async fn get_next_after(&self, seq: u64) -> Option<PendingRequest> {
        self.read(|doc| doc.entries.iter().find(|e| e.seq > seq).cloned())
            .await
    }

    /// All entries in replay order.
    pub async fn entries(&self) -> Vec<PendingRequest> {
        self.read(|doc| doc.entries.clone()).await
    }

    /// Drop an entry. Returns whether it was queued.
    pub async fn remove(&self, id: &PendingRequestId) -> OfflineResult<bool> {
        let mut state = self.state.lock().await;
        self.load(&mut state).await?;

        let mut doc = state.doc.clone();
        let before = doc.entries.len();
        doc.entries.retain(|e| &e.id != id);
        if doc.entries.len() == before {
            return Ok(false);
        }

        self.persist(&doc).await?;
        state.doc = doc;
        debug!(id = %id, "Removed queued mutation");
        Ok(true)
    }

    /// Count a failed replay. Returns the new count, or `None` for an
    /// unknown id.
    pub async fn increment_retry(&self, id: &PendingRequestId) -> OfflineResult<Option<u32>> {
        let mut state = self.state.lock().await;
        self.load(&mut state).await?;

        let mut doc = state.doc.clone();
        let Some(entry) = doc.entries.iter_mut().find(|e| &e.id == id) else {
            return Ok(None);
        };
        entry.retry_count += 1;
        let retry_count = entry.retry_count;

        self.persist(&doc).await?;
        state.doc = doc;
        Ok(Some(retry_count))
    }

    /// Drop every entry. Returns how many were discarded.
    pub async fn clear(&self) -> OfflineResult<usize> {
        let mut state = self.state.lock().await;
        self.load(&mut state).await?;

        let mut doc = state.doc.clone();
        let discarded = doc.entries.len();
        doc.entries.clear();

        self.persist(&doc).await?;
        state.doc = doc;
        warn!(discarded, "Cleared offline queue");
        Ok(discarded)
    }

    async fn read<R>(&self, f: impl FnOnce(&QueueDocument) -> R) -> R {
        let mut state = self.state.lock().await;
        if let Err(e) = self.load(&mut state).await {
            warn!(error = %e, "Offline queue could not be loaded");
        }
        f(&state.doc)
    }

    async fn load(&self, state: &mut QueueState) -> OfflineResult<()> {
        if state.loaded {
            return Ok(());
        }

        let mut doc: QueueDocument = get_json(self.store.as_ref(), &self.key)
            .await?
            .unwrap_or_default();
        doc.entries.sort_by_key(|e| e.seq);
        if let Some(last) = doc.entries.last() {
            doc.next_seq = doc.next_seq.max(last.seq + 1);
        }

        info!(pending = doc.entries.len(), "Loaded offline queue");
        record_queue_depth(doc.entries.len());

        state.doc = doc;
        state.loaded = true;
        Ok(())
    }

    async fn persist(&self, doc: &QueueDocument) -> OfflineResult<()> {
        set_json(self.store.as_ref(), &self.key, doc).await?;
        record_queue_depth(doc.entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pos_models::HttpMethod;
    use pos_storage::{MemoryStore, StorageError, StorageResult};
    use serde_json::json;
    use tokio_test::assert_ok;

    fn create(name: &str) -> NewPendingRequest {
        NewPendingRequest::new(HttpMethod::Post, "/products").with_payload(json!({ "name": name }))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));
        let first = assert_ok!(queue.enqueue(create("Tea")).await);
        let second = assert_ok!(queue.enqueue(create("Coffee")).await);

        assert!(first.seq < second.seq);
        assert_eq!(queue.size().await, 2);
        assert_eq!(queue.get_next().await.map(|e| e.id), Some(first.id.clone()));
        assert_eq!(queue.get_next_after(first.seq).await.map(|e| e.id), Some(second.id.clone()));
        assert!(queue.get_next_after(second.seq).await.is_none());

        assert!(assert_ok!(queue.remove(&first.id).await));
        assert_eq!(queue.get_next().await.map(|e| e.id), Some(second.id));
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let queued = {
            let queue = OfflineQueue::new(store.clone());
            let entry = assert_ok!(queue.enqueue(create("Tea")).await);
            assert_ok!(queue.increment_retry(&entry.id).await);
            entry
        };

        let reopened = OfflineQueue::new(store);
        assert_eq!(assert_ok!(reopened.init().await), 1);

        let entry = reopened.get_next().await.unwrap();
        assert_eq!(entry.id, queued.id);
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.payload, Some(json!({"name": "Tea"})));

        // Positions keep increasing across restarts
        let next = assert_ok!(reopened.enqueue(create("Coffee")).await);
        assert!(next.seq > queued.seq);
    }

    #[tokio::test]
    async fn test_enqueue_before_init_keeps_persisted_entries() {
        let store = Arc::new(MemoryStore::new());
        assert_ok!(OfflineQueue::new(store.clone()).enqueue(create("Tea")).await);

        let queue = OfflineQueue::new(store);
        assert_ok!(queue.enqueue(create("Coffee")).await);
        assert_eq!(queue.size().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));
        let missing = PendingRequestId::from_string("missing");
        assert!(!assert_ok!(queue.remove(&missing).await));
        assert_eq!(assert_ok!(queue.increment_retry(&missing).await), None);
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));
        assert_ok!(queue.enqueue(create("Tea")).await);
        assert_ok!(queue.enqueue(create("Coffee")).await);

        assert_eq!(assert_ok!(queue.clear().await), 2);
        assert!(queue.is_empty().await);
    }

    /// Store that rejects every write.
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::write_failed("storage full"))
        }
        async fn delete(&self, _key: &str) -> StorageResult<()> {
            Err(StorageError::write_failed("storage full"))
        }
    }

    #[tokio::test]
    async fn test_failed_write_surfaces_and_rolls_back() {
        let queue = OfflineQueue::new(Arc::new(ReadOnlyStore));

        let result = queue.enqueue(create("Tea")).await;

        assert!(matches!(result, Err(OfflineError::EnqueueFailed(ref m)) if m.contains("storage full")));
        assert!(queue.is_empty().await);
    }
}
