//! Credential models.
//!
//! These mirror what the backend hands out on login/refresh and what the
//! client persists in its secure store.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Persisted credential state.
///
/// Either both tokens are present or the record does not exist at all; the
/// token store never treats a partial record as authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Bearer token attached to authenticated requests
    pub access_token: String,
    /// Long-lived token exchanged at `/auth/refresh`
    pub refresh_token: String,
    /// Access token expiry (epoch milliseconds)
    pub expires_at_ms: i64,
}

impl TokenRecord {
    /// Build a record expiring `expires_in_secs` from now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at_ms: expiry_from_now(expires_in_secs),
        }
    }
}

/// Epoch milliseconds `expires_in_secs` from now.
pub fn expiry_from_now(expires_in_secs: u64) -> i64 {
    let millis = i64::try_from(expires_in_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_add(millis)
}

/// Claims the client inspects inside an access token.
///
/// Signature verification is the backend's job; the client only checks
/// structure so it can drop obviously unusable credentials early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user id)
    pub sub: String,
    /// Expiration (epoch seconds)
    pub exp: i64,
    /// Issued at (epoch seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Tenant the token belongs to. Tokens without it predate multi-tenancy
    /// and are rejected by the backend.
    #[serde(default, alias = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl TokenClaims {
    /// Tenant claim, if present and non-empty.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Snapshot of the signed-in user kept next to the tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Body returned by `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: UserSnapshot,
}

/// Body returned by `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: u64,
}
