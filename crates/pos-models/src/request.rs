//! Offline queue entries.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique pending request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingRequestId(pub String);

impl PendingRequestId {
    /// Generate a new random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PendingRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PendingRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Get string representation of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// True for methods that change server state and may be queued offline.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A mutation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    /// Unique entry id
    pub id: PendingRequestId,
    /// Monotonic queue position; replay order is ascending `seq`
    pub seq: u64,
    /// Path relative to the API base URL
    pub endpoint: String,
    /// Query parameters, unencoded
    #[serde(default)]
    pub query: Vec<(String, String)>,
    /// HTTP method
    pub method: HttpMethod,
    /// JSON body, if any
    #[serde(default)]
    pub payload: Option<Value>,
    /// Extra headers captured at enqueue time
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// When the entry was queued (epoch milliseconds)
    pub enqueued_at_ms: i64,
    /// Failed replay attempts so far
    #[serde(default)]
    pub retry_count: u32,
}

/// A mutation as handed to the queue, before it gets an id and position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewPendingRequest {
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub method: HttpMethod,
    pub payload: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

impl NewPendingRequest {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            ..Default::default()
        }
    }

    /// Set the JSON body.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Add a query parameter replayed with the request.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add a header replayed with the request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Assign identity and queue position.
    pub fn into_pending(self, seq: u64) -> PendingRequest {
        PendingRequest {
            id: PendingRequestId::new(),
            seq,
            endpoint: self.endpoint,
            query: self.query,
            method: self.method,
            payload: self.payload,
            headers: self.headers,
            enqueued_at_ms: Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_wire_format() {
        assert_eq!(serde_json::to_string(&HttpMethod::Patch).unwrap(), "\"PATCH\"");
        assert!(HttpMethod::Delete.is_mutation());
        assert!(!HttpMethod::Get.is_mutation());
    }

    #[test]
    fn test_into_pending_starts_fresh() {
        let pending = NewPendingRequest::new(HttpMethod::Post, "/products")
            .with_payload(json!({"name": "Tea"}))
            .with_header("X-Idempotency-Key", "abc")
            .into_pending(7);

        assert_eq!(pending.seq, 7);
        assert_eq!(pending.retry_count, 0);
        assert_eq!(pending.headers.get("X-Idempotency-Key").map(String::as_str), Some("abc"));
        assert!(!pending.id.as_str().is_empty());
    }

    #[test]
    fn test_pending_request_tolerates_missing_optional_fields() {
        let pending: PendingRequest = serde_json::from_value(json!({
            "id": "p1",
            "seq": 1,
            "endpoint": "/products/1",
            "method": "DELETE",
            "enqueuedAtMs": 0
        }))
        .unwrap();
        assert_eq!(pending.retry_count, 0);
        assert!(pending.payload.is_none());
        assert!(pending.headers.is_empty());
        assert!(pending.query.is_empty());
    }

    #[test]
    fn test_query_with_reserved_characters_survives_persistence() {
        let pending = NewPendingRequest::new(HttpMethod::Delete, "/receipts/7")
            .with_query("reason", "void & refund")
            .with_query("note", "a=b #2")
            .into_pending(1);

        let stored = serde_json::to_string(&pending).unwrap();
        let restored: PendingRequest = serde_json::from_str(&stored).unwrap();

        assert_eq!(restored.endpoint, "/receipts/7");
        assert_eq!(
            restored.query,
            vec![
                ("reason".to_string(), "void & refund".to_string()),
                ("note".to_string(), "a=b #2".to_string()),
            ]
        );
    }
}
