//! Product service.

use std::sync::Arc;

use serde_json::Value;

use pos_client::{ApiError, ApiRequest, ApiResult, CacheNamespace};
use pos_models::{normalize_list, NewProduct, Product, ProductCount};

use crate::error::AccessResult;
use crate::layer::{AccessLayer, ReadRequest, WriteOutcome};

/// Products: cached reads, queueable writes.
#[derive(Clone)]
pub struct ProductService {
    layer: Arc<AccessLayer>,
}

impl ProductService {
    pub fn new(layer: Arc<AccessLayer>) -> Self {
        Self { layer }
    }

    /// Number of products.
    pub async fn count(&self) -> ApiResult<u64> {
        let value = self
            .layer
            .read(ReadRequest::get("/products/count", CacheNamespace::Products.key("count")))
            .await?;
        let count: ProductCount = serde_json::from_value(value)?;
        Ok(count.value())
    }

    /// One page of products. Any of the backend's list shapes is accepted.
    pub async fn list(&self, page: Option<u32>) -> ApiResult<Vec<Product>> {
        let mut request = ApiRequest::get("/products");
        let key = match page {
            Some(page) => {
                request = request.with_query("page", page.to_string());
                CacheNamespace::Products.key(&format!("list:{}", page))
            }
            None => CacheNamespace::Products.key("list"),
        };

        let value = self.layer.read(ReadRequest::new(request, key)).await?;
        normalize_list(value)
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(ApiError::from))
            .collect()
    }

    pub async fn get(&self, id: &str) -> ApiResult<Product> {
        let value = self
            .layer
            .read(ReadRequest::get(format!("/products/{}", id), CacheNamespace::Products.key(id)))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn create(&self, product: &NewProduct) -> AccessResult<WriteOutcome> {
        let body = serde_json::to_value(product).map_err(ApiError::from)?;
        self.layer.write(ApiRequest::post("/products", body)).await
    }

    pub async fn update(&self, id: &str, changes: Value) -> AccessResult<WriteOutcome> {
        self.layer
            .write(ApiRequest::put(format!("/products/{}", id), changes))
            .await
    }

    pub async fn delete(&self, id: &str) -> AccessResult<WriteOutcome> {
        self.layer.write(ApiRequest::delete(format!("/products/{}", id))).await
    }
}
