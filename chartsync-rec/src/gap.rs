//! Acquisition gap detector
//!
//! Classifies the movies surfaced by a chart run against local holdings:
//! `present` (skip), `absent` (emit an acquisition task), `ambiguous`
//! (multiple candidate matches, surfaced for manual review). Lookups are
//! memoized through the reconciliation cache.

use crate::cache::{cache_key, CacheStore};
use crate::clients::LocalIndex;
use crate::types::{AcquisitionTask, LookupResult, SyncError, SyncResult};
use chartsync_common::db::movies;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A movie with several candidate local matches; needs a human decision
#[derive(Debug, Clone)]
pub struct AmbiguousMatch {
    pub movie_id: Uuid,
    pub censored_id: String,
    pub candidates: Vec<PathBuf>,
}

/// Outcome of one gap scan
#[derive(Debug, Default)]
pub struct GapReport {
    /// Movies missing locally; one acquisition task each
    pub tasks: Vec<AcquisitionTask>,
    /// Movies already held locally
    pub present: Vec<Uuid>,
    /// Manual-review conditions
    pub ambiguous: Vec<AmbiguousMatch>,
    /// Movies skipped because their lookup failed transiently
    pub skipped: usize,
}

/// Detects which resolved movies lack a verified local copy
pub struct GapDetector {
    pool: SqlitePool,
    local_index: Arc<dyn LocalIndex>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
}

impl GapDetector {
    pub fn new(
        pool: SqlitePool,
        local_index: Arc<dyn LocalIndex>,
        cache: Arc<dyn CacheStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            pool,
            local_index,
            cache,
            cache_ttl,
        }
    }

    /// Scan the given movies (active entries of the current run) for gaps
    ///
    /// A transient lookup failure skips that movie only; the rest of the scan
    /// proceeds. Invariant and catalog errors still abort.
    pub async fn detect(&self, movie_ids: &[Uuid]) -> SyncResult<GapReport> {
        let mut report = GapReport::default();

        for &movie_id in movie_ids {
            let movie = movies::find_by_guid(&self.pool, movie_id)
                .await
                .map_err(SyncError::Catalog)?
                .ok_or_else(|| {
                    SyncError::InvariantViolation(format!(
                        "Active chart entry references missing movie {}",
                        movie_id
                    ))
                })?;

            // The catalog already knows about a verified copy
            if movie.have_file {
                report.present.push(movie_id);
                continue;
            }

            match self.lookup_cached(&movie.censored_id).await {
                Ok(LookupResult::Present(path)) => {
                    tracing::debug!(identifier = %movie.censored_id, path = %path.display(), "Local copy found");
                    movies::set_have_file(&self.pool, movie_id, true)
                        .await
                        .map_err(SyncError::Catalog)?;
                    report.present.push(movie_id);
                }
                Ok(LookupResult::Absent) => {
                    report
                        .tasks
                        .push(AcquisitionTask::new(movie_id, movie.censored_id.clone()));
                }
                Ok(LookupResult::Ambiguous(candidates)) => {
                    tracing::warn!(
                        identifier = %movie.censored_id,
                        candidates = candidates.len(),
                        "Ambiguous local matches, needs manual review"
                    );
                    report.ambiguous.push(AmbiguousMatch {
                        movie_id,
                        censored_id: movie.censored_id.clone(),
                        candidates,
                    });
                }
                Err(e) if e.is_retryable() => {
                    // One movie's lookup failing never blocks the others
                    tracing::warn!(identifier = %movie.censored_id, error = %e, "Lookup failed, skipping movie");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            scanned = movie_ids.len(),
            gaps = report.tasks.len(),
            present = report.present.len(),
            ambiguous = report.ambiguous.len(),
            skipped = report.skipped,
            "Gap scan complete"
        );

        Ok(report)
    }

    /// Local index lookup through the reconciliation cache
    async fn lookup_cached(&self, identifier: &str) -> SyncResult<LookupResult> {
        let key = cache_key("lookup", identifier);

        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(result) = serde_json::from_str::<LookupResult>(&cached) {
                return Ok(result);
            }
            // Undecodable cache entry: treat as a miss
        }

        let result = self.local_index.lookup(identifier).await?;

        if let Ok(serialized) = serde_json::to_string(&result) {
            self.cache.set(&key, serialized, self.cache_ttl).await;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;
    use chartsync_common::db::create_tables;
    use chartsync_common::db::movies::Movie;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted local index; counts calls so caching is observable
    struct FakeIndex {
        result: LookupResult,
        calls: AtomicUsize,
    }

    impl FakeIndex {
        fn new(result: LookupResult) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LocalIndex for FakeIndex {
        async fn lookup(&self, _identifier: &str) -> SyncResult<LookupResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    async fn fixture(result: LookupResult) -> (SqlitePool, Arc<FakeIndex>, GapDetector) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_tables(&pool).await.unwrap();
        let index = Arc::new(FakeIndex::new(result));
        let detector = GapDetector::new(
            pool.clone(),
            Arc::clone(&index) as Arc<dyn LocalIndex>,
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
        );
        (pool, index, detector)
    }

    async fn movie(pool: &SqlitePool, id: &str) -> Movie {
        let m = Movie::stub(id.to_string());
        movies::save_movie(pool, &m).await.unwrap();
        m
    }

    #[tokio::test]
    async fn test_absent_movie_emits_task() {
        let (pool, _, detector) = fixture(LookupResult::Absent).await;
        let m = movie(&pool, "ABC-001").await;

        let report = detector.detect(&[m.guid]).await.unwrap();
        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].censored_id, "ABC-001");
        assert_eq!(report.tasks[0].attempt_count, 0);
    }

    #[tokio::test]
    async fn test_present_movie_is_skipped_and_marked() {
        let (pool, _, detector) =
            fixture(LookupResult::Present(PathBuf::from("/media/ABC-001.mp4"))).await;
        let m = movie(&pool, "ABC-001").await;

        let report = detector.detect(&[m.guid]).await.unwrap();
        assert!(report.tasks.is_empty());
        assert_eq!(report.present, vec![m.guid]);

        let loaded = movies::find_by_guid(&pool, m.guid).await.unwrap().unwrap();
        assert!(loaded.have_file);
    }

    #[tokio::test]
    async fn test_ambiguous_is_surfaced_not_resolved() {
        let (pool, _, detector) = fixture(LookupResult::Ambiguous(vec![
            PathBuf::from("/media/a.mp4"),
            PathBuf::from("/media/b.mp4"),
        ]))
        .await;
        let m = movie(&pool, "ABC-001").await;

        let report = detector.detect(&[m.guid]).await.unwrap();
        assert!(report.tasks.is_empty());
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].candidates.len(), 2);

        // Not marked as held
        let loaded = movies::find_by_guid(&pool, m.guid).await.unwrap().unwrap();
        assert!(!loaded.have_file);
    }

    #[tokio::test]
    async fn test_lookups_are_cached_within_ttl() {
        let (pool, index, detector) = fixture(LookupResult::Absent).await;
        let m = movie(&pool, "ABC-001").await;

        detector.detect(&[m.guid]).await.unwrap();
        detector.detect(&[m.guid]).await.unwrap();

        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_have_file_short_circuits_lookup() {
        let (pool, index, detector) = fixture(LookupResult::Absent).await;
        let m = movie(&pool, "ABC-001").await;
        movies::set_have_file(&pool, m.guid, true).await.unwrap();

        let report = detector.detect(&[m.guid]).await.unwrap();
        assert_eq!(report.present, vec![m.guid]);
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
    }
}
