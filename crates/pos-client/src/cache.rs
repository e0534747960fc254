//! Short-lived response cache.
//!
//! Keys are namespaced (`"products:count"`, `"dashboard:summary"`) so that a
//! write can drop everything under a resource prefix in one pass. The cache
//! holds plain JSON snapshots and never performs I/O itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DEFAULT_CACHE_TTL;
use crate::metrics::record_cache_lookup;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// TTL key-value cache for read responses.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cached value, or `None` on miss or expiry.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    record_cache_lookup(true);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    record_cache_lookup(false);
                    return None;
                }
            }
        }

        // Expired: drop it unless someone refreshed it meanwhile
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        record_cache_lookup(false);
        None
    }

    /// Store a value for `ttl`.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    /// Store a value for the default TTL.
    pub async fn set_default(&self, key: &str, value: Value) {
        self.set(key, value, self.default_ttl).await;
    }

    /// Drop one key. Returns whether it was present.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop every key matching `pattern`. Returns how many were removed.
    pub async fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.is_match(key));
        let removed = before - entries.len();

        if removed > 0 {
            debug!(pattern = %pattern, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Remove expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// =============================================================================
// Namespaces
// =============================================================================

/// Resource namespaces used as cache key prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    Products,
    Categories,
    Inventory,
    Receipts,
    Customers,
    Dashboard,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 6] = [
        CacheNamespace::Products,
        CacheNamespace::Categories,
        CacheNamespace::Inventory,
        CacheNamespace::Receipts,
        CacheNamespace::Customers,
        CacheNamespace::Dashboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Products => "products",
            CacheNamespace::Categories => "categories",
            CacheNamespace::Inventory => "inventory",
            CacheNamespace::Receipts => "receipts",
            CacheNamespace::Customers => "customers",
            CacheNamespace::Dashboard => "dashboard",
        }
    }

    /// Cache key inside this namespace.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.as_str(), suffix)
    }

    /// Namespace owning an API path such as `/products/42`.
    pub fn from_endpoint(path: &str) -> Option<Self> {
        let segment = path
            .trim_start_matches('/')
            .split(['/', '?'])
            .next()
            .unwrap_or_default();
        Self::ALL.into_iter().find(|ns| ns.as_str() == segment)
    }

    /// Namespaces whose cached data is derived from this one.
    ///
    /// Dashboard summaries aggregate products and sales; receipts change
    /// stock levels.
    pub fn dependents(&self) -> &'static [CacheNamespace] {
        match self {
            CacheNamespace::Products => &[CacheNamespace::Dashboard],
            CacheNamespace::Categories => &[CacheNamespace::Products],
            CacheNamespace::Inventory => &[CacheNamespace::Products, CacheNamespace::Dashboard],
            CacheNamespace::Receipts => &[
                CacheNamespace::Inventory,
                CacheNamespace::Products,
                CacheNamespace::Dashboard,
            ],
            CacheNamespace::Customers => &[],
            CacheNamespace::Dashboard => &[],
        }
    }

    /// `^<namespace>:` as a regex.
    pub fn pattern(&self) -> Option<Regex> {
        Regex::new(&format!("^{}:", regex::escape(self.as_str()))).ok()
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Cache Manager
// =============================================================================

/// Resource-scoped invalidation on top of [`ResponseCache`].
#[derive(Clone)]
pub struct CacheManager {
    cache: Arc<ResponseCache>,
}

impl CacheManager {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Invalidate a namespace and everything derived from it.
    pub async fn invalidate_namespace(&self, namespace: CacheNamespace) -> usize {
        let mut removed = 0;
        let affected = std::iter::once(&namespace).chain(namespace.dependents());
        for pattern in affected.filter_map(CacheNamespace::pattern) {
            removed += self.cache.invalidate_pattern(&pattern).await;
        }
        removed
    }

    /// Invalidate whatever a successful write to `path` could have changed.
    pub async fn invalidate_for_endpoint(&self, path: &str) -> usize {
        match CacheNamespace::from_endpoint(path) {
            Some(namespace) => self.invalidate_namespace(namespace).await,
            None => {
                debug!(path = %path, "No cache namespace for endpoint");
                0
            }
        }
    }

    pub async fn invalidate_all(&self) {
        self.cache.clear().await;
    }
}
