//! Tests for the request pipeline against a mock backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pos_models::{TokenClaims, UserSnapshot};
use pos_storage::MemoryStore;

use crate::config::ClientConfig;
use crate::error::{ApiError, NetworkFailureKind};
use crate::pipeline::{ApiRequest, RequestPipeline};
use crate::retry::RetryPolicy;
use crate::token_store::TokenStore;

// =============================================================================
// Test Helpers
// =============================================================================

fn mint(sub: &str) -> String {
    let claims = TokenClaims {
        sub: sub.to_string(),
        exp: Utc::now().timestamp() + 3600,
        iat: Some(Utc::now().timestamp()),
        tenant_id: Some("store-1".to_string()),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
}

fn test_config(base_url: &str) -> ClientConfig {
    ClientConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        ..ClientConfig::new(base_url)
    }
}

async fn signed_in(server: &MockServer, access: &str) -> (Arc<RequestPipeline>, Arc<TokenStore>) {
    let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
    tokens.store_tokens(access, "refresh-1", 3600).await.unwrap();
    let pipeline = Arc::new(RequestPipeline::new(test_config(&server.uri()), Arc::clone(&tokens)).unwrap());
    (pipeline, tokens)
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

// =============================================================================
// Headers
// =============================================================================

#[tokio::test]
async fn test_attaches_auth_and_caller_headers() {
    let server = MockServer::start().await;
    let access = mint("user-1");
    let (pipeline, _) = signed_in(&server, &access).await;

    Mock::given(method("GET"))
        .and(path("/products/count"))
        .and(header("Authorization", bearer(&access)))
        .and(header("Content-Type", "application/json"))
        .and(header("X-Caller-Id", "pos-device"))
        .and(header_exists("X-Request-Timestamp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 12})))
        .expect(1)
        .mount(&server)
        .await;

    let value = pipeline.send(&ApiRequest::get("/products/count")).await.unwrap();
    assert_eq!(value, json!({"count": 12}));
}

#[tokio::test]
async fn test_caller_id_comes_from_user_snapshot() {
    let server = MockServer::start().await;
    let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
    let user = UserSnapshot {
        id: "cashier-7".into(),
        email: None,
        name: None,
        tenant_id: Some("store-1".into()),
    };
    tokens.store_session(&mint("cashier-7"), "r", 3600, &user).await.unwrap();
    let pipeline = RequestPipeline::new(test_config(&server.uri()), tokens).unwrap();

    Mock::given(method("GET"))
        .and(path("/dashboard/summary"))
        .and(header("X-Caller-Id", "cashier-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    pipeline.send(&ApiRequest::get("/dashboard/summary")).await.unwrap();
}

#[tokio::test]
async fn test_empty_success_body_is_null() {
    let server = MockServer::start().await;
    let (pipeline, _) = signed_in(&server, &mint("user-1")).await;

    Mock::given(method("DELETE"))
        .and(path("/products/9"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let value = pipeline.send(&ApiRequest::delete("/products/9")).await.unwrap();
    assert!(value.is_null());
}

// =============================================================================
// Refresh Protocol
// =============================================================================

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    let old = mint("old");
    let new = mint("new");
    let (pipeline, tokens) = signed_in(&server, &old).await;

    Mock::given(method("GET"))
        .and(path("/products"))
        .and(header("Authorization", bearer(&old)))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "jwt expired"})))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/products"))
        .and(header("Authorization", bearer(&new)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "p1"}])))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refreshToken": "refresh-1"})))
        .and(header_exists("X-Caller-Id"))
        .and(header_exists("X-Request-Timestamp"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"accessToken": new, "expiresIn": 3600}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::get("/products");
    let (a, b, c) = tokio::join!(
        pipeline.send(&request),
        pipeline.send(&request),
        pipeline.send(&request)
    );

    for result in [a, b, c] {
        assert_eq!(result.unwrap(), json!([{"id": "p1"}]));
    }
    assert_eq!(tokens.get_access_token().await, Some(new));
    assert_eq!(tokens.get_refresh_token().await.as_deref(), Some("refresh-1"));
    assert!(!pipeline.refresher().is_refreshing().await);
}

#[tokio::test]
async fn test_failed_refresh_rejects_everyone_and_signs_out() {
    let server = MockServer::start().await;
    let (pipeline, tokens) = signed_in(&server, &mint("old")).await;

    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "refresh token revoked"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::get("/products");
    let (a, b, c) = tokio::join!(
        pipeline.send(&request),
        pipeline.send(&request),
        pipeline.send(&request)
    );

    for result in [a, b, c] {
        assert!(matches!(result, Err(ApiError::SessionExpired(_))));
    }
    assert!(!tokens.is_authenticated().await);
}

#[tokio::test]
async fn test_missing_refresh_token_fails_without_network() {
    let server = MockServer::start().await;
    let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
    let pipeline = RequestPipeline::new(test_config(&server.uri()), Arc::clone(&tokens)).unwrap();

    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = pipeline.send(&ApiRequest::get("/products")).await;
    assert!(matches!(result, Err(ApiError::SessionExpired(_))));
}

#[tokio::test]
async fn test_second_401_clears_session() {
    let server = MockServer::start().await;
    let (pipeline, tokens) = signed_in(&server, &mint("old")).await;

    Mock::given(method("GET"))
        .and(path("/receipts"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": mint("new"), "expiresIn": 3600})))
        .expect(1)
        .mount(&server)
        .await;

    let result = pipeline.send(&ApiRequest::get("/receipts")).await;

    assert!(matches!(result, Err(ApiError::SessionExpired(_))));
    assert!(!tokens.is_authenticated().await);
}

#[tokio::test]
async fn test_refreshes_ahead_of_expiry() {
    let server = MockServer::start().await;
    let old = mint("old");
    let new = mint("new");
    let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
    // Two minutes left: inside the refresh buffer
    tokens.store_tokens(&old, "refresh-1", 120).await.unwrap();
    let pipeline = RequestPipeline::new(test_config(&server.uri()), Arc::clone(&tokens)).unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": new, "expiresIn": 3600})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/products"))
        .and(header("Authorization", bearer(&new)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    pipeline.send(&ApiRequest::get("/products")).await.unwrap();
    assert!(!tokens.is_token_expired().await);
}

#[tokio::test]
async fn test_early_refresh_without_response_keeps_session() {
    let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
    tokens.store_tokens(&mint("old"), "refresh-1", 120).await.unwrap();
    let pipeline = RequestPipeline::new(test_config("http://127.0.0.1:1"), Arc::clone(&tokens)).unwrap();

    let err = pipeline.send(&ApiRequest::get("/products")).await.unwrap_err();

    assert!(err.is_network());
    assert!(tokens.is_authenticated().await);
    assert_eq!(tokens.get_refresh_token().await.as_deref(), Some("refresh-1"));
    assert!(!pipeline.refresher().is_refreshing().await);
}

#[tokio::test]
async fn test_early_refresh_rejected_signs_out() {
    let server = MockServer::start().await;
    let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
    tokens.store_tokens(&mint("old"), "refresh-1", 120).await.unwrap();
    let pipeline = RequestPipeline::new(test_config(&server.uri()), Arc::clone(&tokens)).unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let result = pipeline.send(&ApiRequest::get("/products")).await;

    assert!(matches!(result, Err(ApiError::SessionExpired(_))));
    assert!(!tokens.is_authenticated().await);
}

// =============================================================================
// Non-refresh Failures
// =============================================================================

#[tokio::test]
async fn test_forbidden_does_not_refresh() {
    let server = MockServer::start().await;
    let (pipeline, tokens) = signed_in(&server, &mint("user-1")).await;

    Mock::given(method("DELETE"))
        .and(path("/products/1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Managers only"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = pipeline.send(&ApiRequest::delete("/products/1")).await;

    assert!(matches!(result, Err(ApiError::Forbidden(ref m)) if m == "Managers only"));
    assert!(tokens.is_authenticated().await);
}

#[tokio::test]
async fn test_tenant_shaped_bad_request_signs_out() {
    let server = MockServer::start().await;
    let (pipeline, tokens) = signed_in(&server, &mint("user-1")).await;

    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "Tenant ID missing from token"})))
        .expect(1)
        .mount(&server)
        .await;

    let result = pipeline.send(&ApiRequest::get("/products")).await;

    assert!(matches!(result, Err(ApiError::TenantClaim(_))));
    assert!(!tokens.is_authenticated().await);
}

#[tokio::test]
async fn test_plain_bad_request_keeps_session() {
    let server = MockServer::start().await;
    let (pipeline, tokens) = signed_in(&server, &mint("user-1")).await;

    Mock::given(method("POST"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "sku already exists"})))
        .mount(&server)
        .await;

    let result = pipeline.send(&ApiRequest::post("/products", json!({"sku": "A1"}))).await;

    assert!(matches!(result, Err(ApiError::Validation { status: 422, .. })));
    assert!(tokens.is_authenticated().await);
}

#[tokio::test]
async fn test_login_401_is_not_refreshed() {
    let server = MockServer::start().await;
    let (pipeline, tokens) = signed_in(&server, &mint("user-1")).await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid credentials"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = pipeline
        .send(&ApiRequest::post("/auth/login", json!({"email": "a@b.c", "password": "x"})))
        .await;

    assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    assert!(tokens.is_authenticated().await);
}

#[tokio::test]
async fn test_rate_limit_reports_retry_after() {
    let server = MockServer::start().await;
    let (pipeline, _) = signed_in(&server, &mint("user-1")).await;

    Mock::given(method("GET"))
        .and(path("/inventory"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
        .mount(&server)
        .await;

    let err = pipeline.send(&ApiRequest::get("/inventory")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.retry_after_ms(), Some(3000));
}

#[tokio::test]
async fn test_unreachable_backend_is_diagnosed() {
    let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
    let pipeline = RequestPipeline::new(test_config("http://127.0.0.1:1"), tokens).unwrap();

    let err = pipeline.send(&ApiRequest::get("/products")).await.unwrap_err();

    match err {
        ApiError::Network(diagnosis) => {
            assert_eq!(diagnosis.kind, NetworkFailureKind::ConnectionRefused);
            assert!(!diagnosis.hint().is_empty());
        }
        other => panic!("expected network error, got {:?}", other),
    }
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
#[serial]
fn test_config_requires_base_url() {
    std::env::remove_var("POS_API_BASE_URL");
    assert!(matches!(ClientConfig::from_env(), Err(ApiError::Config(_))));
}

#[test]
#[serial]
fn test_config_defaults_and_overrides() {
    std::env::set_var("POS_API_BASE_URL", "https://api.example.com/");
    std::env::set_var("POS_RETRY_MAX_ATTEMPTS", "5");
    std::env::set_var("POS_CACHE_TTL_MS", "not-a-number");
    std::env::remove_var("POS_CLIENT_ID");

    let config = ClientConfig::from_env().unwrap();

    assert_eq!(config.base_url, "https://api.example.com");
    assert_eq!(config.url("products"), "https://api.example.com/products");
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.cache_ttl, Duration::from_secs(30));
    assert_eq!(config.client_id, "pos-device");
    assert_eq!(config.timeout, Duration::from_secs(30));

    std::env::remove_var("POS_API_BASE_URL");
    std::env::remove_var("POS_RETRY_MAX_ATTEMPTS");
    std::env::remove_var("POS_CACHE_TTL_MS");
}
