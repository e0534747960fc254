//! API error types.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur while talking to the backend.
///
/// `Clone` so one outcome can be handed to every caller sharing a
/// deduplicated read or a single refresh.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 4xx other than 401/403/429.
    #[error("Request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    /// 401 that has not (yet) gone through the refresh protocol.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credentials are gone; the user must log in again.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 403: the token is valid but not allowed to do this.
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Malformed or legacy token shape reported by the backend.
    #[error("Invalid tenant credentials: {0}")]
    TenantClaim(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after_ms: Option<u64>,
        message: String,
    },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(NetworkDiagnosis),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map a non-success status and its body to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        Self::from_response(status, &body.into(), None)
    }

    /// Map a non-success response to an error, honouring `Retry-After`.
    pub fn from_response(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        let error_body = ErrorBody::parse(body);
        let message = error_body.message().unwrap_or(body).to_string();

        match status {
            400 if is_credential_error(&error_body, body) => ApiError::TenantClaim(message),
            401 => ApiError::Unauthorized(message),
            403 => ApiError::Forbidden(message),
            429 => ApiError::RateLimited {
                retry_after_ms,
                message,
            },
            400..=499 => ApiError::Validation { status, message },
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Http { status, message },
        }
    }

    /// True for transient conditions worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Server { .. })
    }

    /// True when no response was received.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    /// HTTP status this error corresponds to, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::Validation { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::Http { status, .. } => Some(*status),
            ApiError::Unauthorized(_) | ApiError::SessionExpired(_) => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::TenantClaim(_) => Some(400),
            ApiError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(NetworkDiagnosis::from_reqwest(&err))
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidResponse(err.to_string())
    }
}

impl From<pos_storage::StorageError> for ApiError {
    fn from(err: pos_storage::StorageError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

// =============================================================================
// Network diagnosis
// =============================================================================

/// Why a request produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailureKind {
    Timeout,
    ConnectionRefused,
    Unknown,
}

/// Diagnosis of a failed round trip, with a hint the UI can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDiagnosis {
    pub kind: NetworkFailureKind,
    pub detail: String,
}

impl NetworkDiagnosis {
    pub fn new(kind: NetworkFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            NetworkFailureKind::Timeout
        } else if err.is_connect() {
            NetworkFailureKind::ConnectionRefused
        } else {
            NetworkFailureKind::Unknown
        };
        Self::new(kind, err.to_string())
    }

    /// Remediation hint for the user.
    pub fn hint(&self) -> &'static str {
        match self.kind {
            NetworkFailureKind::Timeout => {
                "The server took too long to respond. Check the connection and try again."
            }
            NetworkFailureKind::ConnectionRefused => {
                "Could not reach the server. Check that the device is online and the server address is correct."
            }
            NetworkFailureKind::Unknown => "A network error occurred. Try again in a moment.",
        }
    }
}

impl fmt::Display for NetworkDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            NetworkFailureKind::Timeout => "timeout",
            NetworkFailureKind::ConnectionRefused => "connection refused",
            NetworkFailureKind::Unknown => "unknown",
        };
        write!(f, "{} ({})", kind, self.detail)
    }
}

// =============================================================================
// Bad-request classification
// =============================================================================

/// Error envelope the backend uses; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// Error codes the backend uses for unusable credentials.
const CREDENTIAL_ERROR_CODES: &[&str] = &[
    "INVALID_TENANT",
    "TENANT_NOT_FOUND",
    "MISSING_TENANT",
    "INVALID_TOKEN",
    "INVALID_JWT",
];

/// Decide whether a 400 means the stored credentials are unusable.
///
/// An explicit `code` field is authoritative when present. Otherwise this is
/// best-effort: the message (or raw body) is searched for "tenant", "jwt" or
/// "token", which is how the backend phrases legacy-token rejections.
fn is_credential_error(error_body: &ErrorBody, raw: &str) -> bool {
    if let Some(code) = error_body.code.as_deref() {
        return CREDENTIAL_ERROR_CODES
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code));
    }

    let text = error_body.message().unwrap_or(raw).to_ascii_lowercase();
    ["tenant", "jwt", "token"].iter().any(|needle| text.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_message_is_credential_error() {
        let err = ApiError::from_http_status(400, r#"{"message":"Tenant ID missing from JWT"}"#);
        assert!(matches!(err, ApiError::TenantClaim(ref m) if m.contains("Tenant")));
    }

    #[test]
    fn test_explicit_code_wins_over_message() {
        let err = ApiError::from_http_status(
            400,
            r#"{"code":"VALIDATION_FAILED","message":"token field is required"}"#,
        );
        assert!(matches!(err, ApiError::Validation { status: 400, .. }));

        let err = ApiError::from_http_status(400, r#"{"code":"invalid_tenant"}"#);
        assert!(matches!(err, ApiError::TenantClaim(_)));
    }

    #[test]
    fn test_plain_bad_request_is_validation() {
        let err = ApiError::from_http_status(400, "price must be positive");
        assert!(matches!(err, ApiError::Validation { status: 400, ref message } if message == "price must be positive"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let err = ApiError::from_response(429, "slow down", Some(1500));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(1500));
        assert_eq!(err.http_status(), Some(429));
    }

    #[test]
    fn test_statuses_map_to_taxonomy() {
        assert!(matches!(ApiError::from_http_status(401, ""), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_http_status(403, ""), ApiError::Forbidden(_)));
        assert!(matches!(ApiError::from_http_status(404, ""), ApiError::Validation { status: 404, .. }));
        assert!(matches!(ApiError::from_http_status(503, ""), ApiError::Server { status: 503, .. }));
        assert!(matches!(ApiError::from_http_status(304, ""), ApiError::Http { status: 304, .. }));
        assert!(ApiError::from_http_status(500, "").is_retryable());
    }

    #[test]
    fn test_network_hint_depends_on_kind() {
        let timeout = NetworkDiagnosis::new(NetworkFailureKind::Timeout, "30s elapsed");
        let refused = NetworkDiagnosis::new(NetworkFailureKind::ConnectionRefused, "refused");
        assert_ne!(timeout.hint(), refused.hint());
        assert!(ApiError::Network(timeout).is_network());
    }
}
