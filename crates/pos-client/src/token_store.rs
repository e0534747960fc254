//! Persisted credential state.
//!
//! Wraps the secure store and owns the four auth keys. Reads fail safe: any
//! storage or validation problem is reported as "not signed in", never as an
//! error, so callers can ask yes/no questions without handling failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pos_models::token::expiry_from_now;
use pos_models::{TokenClaims, TokenRecord, UserSnapshot};
use pos_storage::KeyValueStore;

use crate::error::ApiResult;

/// Secure store keys. Always written and cleared as a group.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "auth.access_token";
    pub const REFRESH_TOKEN: &str = "auth.refresh_token";
    pub const USER: &str = "auth.user";
    pub const TOKEN_EXPIRY: &str = "auth.token_expiry";

    pub const ALL: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, USER, TOKEN_EXPIRY];
}

/// Refresh this long before the recorded expiry (5 minutes).
pub const EXPIRY_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Why a stored access token was rejected locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("token is empty")]
    Empty,
    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("token has expired")]
    Expired,
    #[error("token has no tenant claim")]
    MissingTenant,
}

/// Check an access token's structure and claims.
///
/// The signature is not verified here; that is the backend's job. This only
/// catches tokens the backend would reject anyway.
pub fn validate_access_token(token: &str) -> Result<TokenClaims, TokenRejection> {
    if token.trim().is_empty() {
        return Err(TokenRejection::Empty);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            _ => TokenRejection::Malformed(e.to_string()),
        })?;

    if data.claims.tenant().is_none() {
        return Err(TokenRejection::MissingTenant);
    }

    Ok(data.claims)
}

/// Owner of the persisted tokens.
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    clear_lock: Mutex<()>,
    /// Set when a clear could not remove the keys; reads then see nothing
    /// until a new session is stored.
    revoked: AtomicBool,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            clear_lock: Mutex::new(()),
            revoked: AtomicBool::new(false),
        }
    }

    /// Persist a fresh token pair; expiry is now + `expires_in_secs`.
    pub async fn store_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: u64,
    ) -> ApiResult<()> {
        let record = TokenRecord::new(access_token, refresh_token, expires_in_secs);
        self.write_record(&record, None).await?;
        debug!(expires_in_secs, "Stored token pair");
        Ok(())
    }

    /// Persist a login result: tokens and user snapshot together.
    pub async fn store_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: u64,
        user: &UserSnapshot,
    ) -> ApiResult<()> {
        let record = TokenRecord::new(access_token, refresh_token, expires_in_secs);
        let user_json = serde_json::to_string(user)?;
        self.write_record(&record, Some(&user_json)).await?;
        info!(user_id = %user.id, "Stored session");
        Ok(())
    }

    /// Replace the access token after a refresh. The refresh token is kept.
    pub async fn update_access_token(&self, access_token: &str, expires_in_secs: u64) -> ApiResult<()> {
        let expiry = expiry_from_now(expires_in_secs).to_string();
        self.store
            .set_many(&[
                (keys::ACCESS_TOKEN, access_token),
                (keys::TOKEN_EXPIRY, expiry.as_str()),
            ])
            .await?;
        debug!(expires_in_secs, "Updated access token");
        Ok(())
    }

    /// The stored access token if it passes local validation.
    ///
    /// A token that fails validation wipes all auth state and yields `None`.
    pub async fn get_access_token(&self) -> Option<String> {
        let token = self.read(keys::ACCESS_TOKEN).await?;

        match validate_access_token(&token) {
            Ok(_) => Some(token),
            Err(reason) => {
                warn!(reason = %reason, "Discarding stored access token");
                self.clear_auth_data().await;
                None
            }
        }
    }

    /// The stored access token without validation.
    pub(crate) async fn raw_access_token(&self) -> Option<String> {
        self.read(keys::ACCESS_TOKEN).await
    }

    pub async fn get_refresh_token(&self) -> Option<String> {
        self.read(keys::REFRESH_TOKEN).await
    }

    /// True once now is within the buffer of (or past) the recorded expiry.
    /// A missing or unreadable expiry counts as expired.
    pub async fn is_token_expired(&self) -> bool {
        match self.expires_at_ms().await {
            Some(expires_at) => Utc::now().timestamp_millis() >= expires_at - EXPIRY_BUFFER_MS,
            None => true,
        }
    }

    /// Both tokens are present. Access token expiry does not matter here; a
    /// refresh token alone is enough to re-authenticate.
    pub async fn is_authenticated(&self) -> bool {
        self.read(keys::ACCESS_TOKEN).await.is_some()
            && self.read(keys::REFRESH_TOKEN).await.is_some()
    }

    /// Snapshot of the signed-in user.
    pub async fn user(&self) -> Option<UserSnapshot> {
        let raw = self.read(keys::USER).await?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable user snapshot");
                None
            }
        }
    }

    /// Remove every auth key.
    ///
    /// Idempotent. A call arriving while another clear is running does not
    /// delete anything itself; it returns once that clear has finished.
    pub async fn clear_auth_data(&self) {
        let _guard = match self.clear_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Auth clear already in progress, waiting");
                let _done = self.clear_lock.lock().await;
                return;
            }
        };

        let cleared = match self.store.delete_many(&keys::ALL).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Batch clear failed, deleting auth keys one by one");
                let mut cleared = true;
                for key in keys::ALL {
                    if let Err(e) = self.store.delete(key).await {
                        warn!(key = %key, error = %e, "Failed to delete auth key");
                        cleared = false;
                    }
                }
                cleared
            }
        };

        if cleared {
            self.revoked.store(false, Ordering::Release);
            info!("Cleared auth data");
        } else {
            self.revoked.store(true, Ordering::Release);
            warn!("Auth data left in store, treating session as signed out");
        }
    }

    /// Write a new session's keys as a group. A successful write lifts a
    /// failed clear's revocation.
    async fn write_record(&self, record: &TokenRecord, user_json: Option<&str>) -> ApiResult<()> {
        let expiry = record.expires_at_ms.to_string();
        let mut entries = vec![
            (keys::ACCESS_TOKEN, record.access_token.as_str()),
            (keys::REFRESH_TOKEN, record.refresh_token.as_str()),
            (keys::TOKEN_EXPIRY, expiry.as_str()),
        ];
        if let Some(user_json) = user_json {
            entries.push((keys::USER, user_json));
        }

        self.store.set_many(&entries).await?;
        self.revoked.store(false, Ordering::Release);
        Ok(())
    }

    async fn expires_at_ms(&self) -> Option<i64> {
        self.read(keys::TOKEN_EXPIRY).await?.parse().ok()
    }

    /// Read a key; storage errors and empty values read as absent.
    async fn read(&self, key: &str) -> Option<String> {
        if self.revoked.load(Ordering::Acquire) {
            return None;
        }
        match self.store.get(key).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key = %key, error = %e, "Secure store read failed");
                None
            }
        }
    }
}
