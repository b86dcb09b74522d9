//! Reconciliation cache
//!
//! Short-lived memoization of resolver and gap-detector lookups. The cache is
//! strictly an optimization: a miss (or an unavailable backend) degrades to a
//! direct external query, never to a failure, which is why the trait surface
//! is infallible.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Cache key: one lookup kind + one normalized identifier
pub fn cache_key(kind: &str, identifier: &str) -> String {
    format!("{}:{}", kind, identifier)
}

/// Key/value store with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live (unexpired) value, or None
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value for at most `ttl`
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

/// In-process TTL cache
///
/// Entries are pruned lazily on access; the map stays small because the
/// pipeline only caches identifiers touched in the current window.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }
}

/// Cache that never stores anything; stands in when caching is disabled
pub struct NullCache;

#[async_trait]
impl CacheStore for NullCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::new();
        cache
            .set("resolve:ABC-001", "value".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(
            cache.get("resolve:ABC-001").await.as_deref(),
            Some("value")
        );
        assert_eq!(cache.get("resolve:ABC-002").await, None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_gone() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_millis(0))
            .await;
        // Zero TTL expires immediately
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_null_cache_always_misses() {
        let cache = NullCache;
        cache.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, None);
    }
}
