//! The access layer facade.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use pos_client::{
    retry_with_backoff, ApiRequest, ApiResult, CacheManager, Deduplicator, RequestPipeline, ResponseCache,
    RetryPolicy, TokenStore,
};
use pos_models::{LoginResponse, NewPendingRequest, PendingRequest, SyncReport, UserSnapshot};
use pos_offline::{ConnectivityMonitor, OfflineQueue, SyncScheduler};
use pos_storage::{FileStore, KeyValueStore, MemoryStore};

use crate::config::{AccessConfig, QUEUE_STORE_FILE, SECURE_STORE_FILE};
use crate::error::{AccessError, AccessResult};
use crate::replay::PipelineReplayer;

// =============================================================================
// Requests
// =============================================================================

/// A cacheable read.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub request: ApiRequest,
    /// Namespaced key, e.g. `products:count`. Also the dedup key.
    pub cache_key: String,
    /// Overrides the configured cache TTL
    pub ttl: Option<Duration>,
}

impl ReadRequest {
    pub fn new(request: ApiRequest, cache_key: impl Into<String>) -> Self {
        Self {
            request,
            cache_key: cache_key.into(),
            ttl: None,
        }
    }

    pub fn get(path: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self::new(ApiRequest::get(path), cache_key)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// What happened to a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The backend accepted it; carries the response body.
    Completed(Value),
    /// No connectivity; it will be replayed by the sync loop.
    Queued(PendingRequest),
}

impl WriteOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued(_))
    }

    /// Response body, if the write already reached the backend.
    pub fn into_value(self) -> Option<Value> {
        match self {
            WriteOutcome::Completed(value) => Some(value),
            WriteOutcome::Queued(_) => None,
        }
    }
}

// =============================================================================
// Access Layer
// =============================================================================

/// Everything resource services need to talk to the backend.
pub struct AccessLayer {
    pipeline: Arc<RequestPipeline>,
    tokens: Arc<TokenStore>,
    cache: CacheManager,
    dedup: Deduplicator<Value>,
    retry: RetryPolicy,
    queue: Arc<OfflineQueue>,
    sync: Arc<SyncScheduler>,
    connectivity: ConnectivityMonitor,
}

impl AccessLayer {
    /// Wire the layer over explicit stores.
    pub fn new(
        config: AccessConfig,
        secure_store: Arc<dyn KeyValueStore>,
        queue_store: Arc<dyn KeyValueStore>,
        connectivity: ConnectivityMonitor,
    ) -> AccessResult<Self> {
        let tokens = Arc::new(TokenStore::new(secure_store));
        let pipeline = Arc::new(RequestPipeline::new(config.client.clone(), Arc::clone(&tokens))?);
        let cache = CacheManager::new(Arc::new(ResponseCache::new(config.client.cache_ttl)));
        let queue = Arc::new(OfflineQueue::with_key(queue_store, config.offline.queue_key.clone()));

        let replayer = Arc::new(PipelineReplayer::new(Arc::clone(&pipeline), cache.clone()));
        let sync = Arc::new(SyncScheduler::new(
            Arc::clone(&queue),
            replayer,
            connectivity.clone(),
            config.offline.clone(),
        ));

        Ok(Self {
            pipeline,
            tokens,
            cache,
            dedup: Deduplicator::new(config.client.dedup_timeout),
            retry: config.client.retry.clone(),
            queue,
            sync,
            connectivity,
        })
    }

    /// Wire the layer over file stores in the configured state directory,
    /// or in-memory stores when there is none.
    pub async fn open(config: AccessConfig, connectivity: ConnectivityMonitor) -> AccessResult<Self> {
        let (secure_store, queue_store): (Arc<dyn KeyValueStore>, Arc<dyn KeyValueStore>) =
            match &config.state_dir {
                Some(dir) => (
                    Arc::new(FileStore::open(dir.join(SECURE_STORE_FILE)).await?),
                    Arc::new(FileStore::open(dir.join(QUEUE_STORE_FILE)).await?),
                ),
                None => {
                    warn!("No state directory configured, session and queue will not persist");
                    (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
                }
            };

        Self::new(config, secure_store, queue_store, connectivity)
    }

    /// Load the persisted queue and start background sync.
    pub async fn init(&self) -> AccessResult<()> {
        let pending = self.queue.init().await?;
        self.sync.refresh_status().await;
        self.sync.start_sync().await;
        info!(pending, "Access layer initialized");
        Ok(())
    }

    /// Stop background sync and drop cached state.
    pub async fn dispose(&self) {
        self.sync.stop_sync().await;
        self.cache.invalidate_all().await;
        self.dedup.clear().await;
        info!("Access layer disposed");
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    /// Cached, deduplicated read with retry on transient failures.
    pub async fn read(&self, read: ReadRequest) -> ApiResult<Value> {
        let ReadRequest {
            request,
            cache_key,
            ttl,
        } = read;
        let ttl = ttl.unwrap_or_else(|| self.cache.cache().default_ttl());
        let cache = Arc::clone(self.cache.cache());
        let pipeline = Arc::clone(&self.pipeline);
        let retry = self.retry.clone();
        let key = cache_key.clone();

        self.dedup
            .execute(&cache_key, move || async move {
                if let Some(hit) = cache.get(&key).await {
                    return Ok(hit);
                }

                let value = retry_with_backoff(&retry, &key, || pipeline.send(&request)).await?;
                cache.set(&key, value.clone(), ttl).await;
                Ok(value)
            })
            .await
    }

    /// Send a mutation, or queue it when there is no connectivity.
    ///
    /// On success the affected cache namespaces are invalidated before this
    /// returns. A request that fails for lack of a response is queued rather
    /// than reported.
    pub async fn write(&self, request: ApiRequest) -> AccessResult<WriteOutcome> {
        if !request.method.is_mutation() {
            return Err(AccessError::NotAMutation {
                method: request.method,
                path: request.path,
            });
        }

        if !self.connectivity.is_online() {
            return Ok(WriteOutcome::Queued(self.enqueue(&request).await?));
        }

        match self.pipeline.send(&request).await {
            Ok(value) => {
                self.cache.invalidate_for_endpoint(&request.path).await;
                Ok(WriteOutcome::Completed(value))
            }
            Err(e) if e.is_network() => {
                warn!(path = %request.path, error = %e, "Backend unreachable, queueing mutation");
                Ok(WriteOutcome::Queued(self.enqueue(&request).await?))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn enqueue(&self, request: &ApiRequest) -> AccessResult<PendingRequest> {
        let mut pending = NewPendingRequest::new(request.method, request.path.clone());
        pending.query = request.query.clone();
        pending.payload = request.body.clone();
        pending.headers = request.headers.clone();

        let queued = self.queue.enqueue(pending).await?;
        self.sync.refresh_status().await;
        Ok(queued)
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Exchange credentials for a session.
    pub async fn login(&self, email: &str, password: &str) -> AccessResult<UserSnapshot> {
        let request = ApiRequest::post("/auth/login", json!({ "email": email, "password": password }));
        let session: LoginResponse = self.pipeline.send_json(&request).await?;

        self.tokens
            .store_session(&session.access_token, &session.refresh_token, session.expires_in, &session.user)
            .await?;
        self.cache.invalidate_all().await;

        info!(user_id = %session.user.id, "Logged in");
        Ok(session.user)
    }

    /// Drop the session and everything cached under it. Queued mutations
    /// are kept.
    pub async fn logout(&self) {
        self.tokens.clear_auth_data().await;
        self.cache.invalidate_all().await;
        self.dedup.clear().await;
        info!("Logged out");
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated().await
    }

    pub async fn current_user(&self) -> Option<UserSnapshot> {
        self.tokens.user().await
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Run a sync pass now. `None` when offline or a pass is running.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.sync.sync_queue().await
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn sync(&self) -> &Arc<SyncScheduler> {
        &self.sync
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }
}
