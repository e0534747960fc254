//! Replays queued mutations through the authenticated pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use pos_client::{ApiRequest, CacheManager, RequestPipeline};
use pos_models::PendingRequest;
use pos_offline::{OfflineError, OfflineResult, Replayer};

/// [`Replayer`] backed by the live pipeline. A replayed write invalidates the
/// same cache namespaces an online write would.
pub struct PipelineReplayer {
    pipeline: Arc<RequestPipeline>,
    cache: CacheManager,
}

impl PipelineReplayer {
    pub fn new(pipeline: Arc<RequestPipeline>, cache: CacheManager) -> Self {
        Self { pipeline, cache }
    }
}

#[async_trait]
impl Replayer for PipelineReplayer {
    async fn replay(&self, pending: &PendingRequest) -> OfflineResult<()> {
        let request = ApiRequest::from_pending(pending);

        self.pipeline
            .send(&request)
            .await
            .map_err(|e| OfflineError::replay_failed(e.to_string()))?;

        let invalidated = self.cache.invalidate_for_endpoint(&pending.endpoint).await;
        debug!(id = %pending.id, invalidated, "Replayed queued mutation");
        Ok(())
    }
}
