//! Movie resolver
//!
//! Maps a normalized chart identifier to a canonical catalog Movie, creating
//! a stub on first sighting. Resolution is idempotent: repeated calls with
//! the same identifier return the same Movie identity, including across
//! concurrent callers, which is guaranteed by per-identifier serialization.

use crate::cache::{cache_key, CacheStore};
use crate::parser::normalize_identifier;
use crate::types::{SyncError, SyncResult};
use chartsync_common::db::movies::{self, Movie, MovieDetails};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Resolves chart identifiers against the movie catalog
pub struct MovieResolver {
    pool: SqlitePool,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    /// One async mutex per in-flight identifier; serializes concurrent
    /// resolution of the same movie across chart runs
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MovieResolver {
    pub fn new(pool: SqlitePool, cache: Arc<dyn CacheStore>, cache_ttl: Duration) -> Self {
        Self {
            pool,
            cache,
            cache_ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an identifier to its catalog Movie, creating a stub if absent
    pub async fn resolve(&self, raw_identifier: &str) -> SyncResult<Movie> {
        let identifier = normalize_identifier(raw_identifier);
        if identifier.is_empty() {
            return Err(SyncError::ParseFailure(format!(
                "Unresolvable identifier: {:?}",
                raw_identifier
            )));
        }

        let lock = self.lock_for(&identifier).await;
        let result = {
            let _guard = lock.lock().await;
            self.resolve_locked(&identifier).await
        };
        drop(lock);
        self.prune_lock(&identifier).await;
        result
    }

    async fn resolve_locked(&self, identifier: &str) -> SyncResult<Movie> {
        // Cache holds identifier → movie guid
        let key = cache_key("resolve", identifier);
        if let Some(cached_guid) = self.cache.get(&key).await {
            if let Ok(guid) = Uuid::parse_str(&cached_guid) {
                if let Some(movie) = movies::find_by_guid(&self.pool, guid).await? {
                    return Ok(movie);
                }
                // Stale cache entry; fall through to the catalog
            }
        }

        if let Some(movie) = movies::find_by_censored_id(&self.pool, identifier).await? {
            self.remember(&key, movie.guid).await;
            return Ok(movie);
        }

        // First sighting: create a minimal stub. The upsert converges on one
        // row even if another process inserted the identifier concurrently,
        // so read back the winner rather than trusting our own guid.
        let stub = Movie::stub(identifier.to_string());
        movies::save_movie(&self.pool, &stub).await?;

        let movie = movies::find_by_censored_id(&self.pool, identifier)
            .await?
            .ok_or_else(|| {
                SyncError::InvariantViolation(format!("Movie {} vanished after insert", identifier))
            })?;

        tracing::info!(identifier = %identifier, guid = %movie.guid, "Created stub movie");

        self.remember(&key, movie.guid).await;
        Ok(movie)
    }

    /// Opportunistically enrich a movie when richer data arrives with a row
    pub async fn update_details(
        &self,
        movie: &Movie,
        details: &MovieDetails,
    ) -> SyncResult<()> {
        movies::update_details(&self.pool, movie.guid, details).await?;
        Ok(())
    }

    async fn lock_for(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no caller holds the lock, so the map tracks
    /// in-flight identifiers rather than every identifier ever seen
    async fn prune_lock(&self, identifier: &str) {
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(identifier) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(identifier);
            }
        }
    }

    async fn remember(&self, key: &str, guid: Uuid) {
        self.cache.set(key, guid.to_string(), self.cache_ttl).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chartsync_common::db::create_tables;

    async fn resolver() -> MovieResolver {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_tables(&pool).await.unwrap();
        MovieResolver::new(pool, Arc::new(MemoryCache::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_resolve_creates_stub_once() {
        let resolver = resolver().await;

        let first = resolver.resolve("abc-001").await.unwrap();
        let second = resolver.resolve("ABC-001").await.unwrap();

        assert_eq!(first.guid, second.guid);
        assert_eq!(first.censored_id, "ABC-001");
        assert!(first.score.is_none());
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic_for_normalized_form() {
        let resolver = resolver().await;

        let raw = resolver.resolve("abp_123").await.unwrap();
        let normalized = resolver.resolve("ABP-123").await.unwrap();

        assert_eq!(raw.guid, normalized.guid);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_converges() {
        let resolver = Arc::new(resolver().await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move { r.resolve("abc-001").await }));
        }

        let mut guids = std::collections::HashSet::new();
        for handle in handles {
            let movie = handle.await.unwrap().unwrap();
            guids.insert(movie.guid);
        }
        assert_eq!(guids.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_map_drains_after_resolution() {
        let resolver = Arc::new(resolver().await);

        let mut handles = Vec::new();
        for i in 0..4 {
            let r = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                r.resolve(&format!("abc-{:03}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Only in-flight identifiers may keep a lock entry alive
        assert!(resolver.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let resolver = resolver().await;
        assert!(matches!(
            resolver.resolve("  ").await,
            Err(SyncError::ParseFailure(_))
        ));
    }
}
