//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key share one underlying call and
//! observe the same outcome, success or failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DEFAULT_DEDUP_TIMEOUT;
use crate::error::ApiResult;
use crate::metrics::record_dedup_join;

type SharedCall<T> = Shared<BoxFuture<'static, ApiResult<T>>>;

struct DedupEntry<T> {
    /// Generation, so a settling call never evicts its replacement
    id: u64,
    call: SharedCall<T>,
    started_at: Instant,
}

/// Collapses concurrent identical calls into one.
pub struct Deduplicator<T> {
    entries: Arc<Mutex<HashMap<String, DedupEntry<T>>>>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl<T> Default for Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TIMEOUT)
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a deduplicator; entries older than `timeout` are treated as stuck.
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `op` for `key`, or join the call already in flight for it.
    pub async fn execute<F, Fut>(&self, key: &str, op: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let call = {
            let mut entries = self.entries.lock().await;

            let live = entries
                .get(key)
                .filter(|entry| entry.started_at.elapsed() < self.timeout)
                .map(|entry| entry.call.clone());

            match live {
                Some(call) => {
                    debug!(key = %key, "Joining in-flight request");
                    record_dedup_join();
                    call
                }
                None => {
                    if entries.contains_key(key) {
                        warn!(key = %key, "Replacing stale in-flight entry");
                    }

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.entries);
                    let owned_key = key.to_string();
                    let fut = op();

                    let call = async move {
                        let result = fut.await;
                        let mut entries = registry.lock().await;
                        if entries.get(&owned_key).map(|e| e.id) == Some(id) {
                            entries.remove(&owned_key);
                        }
                        result
                    }
                    .boxed()
                    .shared();

                    entries.insert(
                        key.to_string(),
                        DedupEntry {
                            id,
                            call: call.clone(),
                            started_at: Instant::now(),
                        },
                    );
                    call
                }
            }
        };

        call.await
    }

    /// Number of keys with a call in flight.
    pub async fn in_flight(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Forget every in-flight entry. Calls already running still settle for
    /// the callers holding them.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}
