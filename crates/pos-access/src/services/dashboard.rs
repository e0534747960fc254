//! Dashboard summary.

use std::sync::Arc;

use serde_json::Value;

use pos_client::{ApiResult, CacheNamespace};

use crate::layer::{AccessLayer, ReadRequest};

/// Read-only aggregates. Invalidated by product, inventory and receipt writes.
#[derive(Clone)]
pub struct DashboardService {
    layer: Arc<AccessLayer>,
}

impl DashboardService {
    pub fn new(layer: Arc<AccessLayer>) -> Self {
        Self { layer }
    }

    pub async fn summary(&self) -> ApiResult<Value> {
        self.layer
            .read(ReadRequest::get("/dashboard/summary", CacheNamespace::Dashboard.key("summary")))
            .await
    }
}
