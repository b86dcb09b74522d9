//! Acquisition executor
//!
//! Drives each AcquisitionTask through
//! `PENDING → SEARCHING → DOWNLOADING → VERIFYING → REGISTERING → DONE`,
//! with failure edges back to `PENDING` (retry after backoff) or to
//! `ABANDONED` once the attempt budget is spent. Tasks fan out across a
//! bounded worker pool; one slot per in-flight download.

use crate::clients::{DownloadClient, LocalIndex, MediaService};
use crate::types::{
    AcquisitionTask, DownloadStatus, LookupResult, SyncError, SyncResult, TaskPhase,
};
use chartsync_common::config::ReconcilerConfig;
use chartsync_common::db::movies::{self, Movie};
use futures::stream::{FuturesUnordered, StreamExt};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Aggregate outcome of one executor pass, for the operator-visible report
#[derive(Debug, Default)]
pub struct AcquisitionReport {
    /// Tasks that completed registration
    pub done: Vec<AcquisitionTask>,
    /// Tasks that spent their retry budget (or hit a non-retryable condition)
    pub abandoned: Vec<AcquisitionTask>,
    /// Tasks still non-terminal when the run was cancelled
    pub cancelled: usize,
}

/// Executes acquisition tasks against the collaborator services
pub struct AcquisitionExecutor {
    pool: SqlitePool,
    local_index: Arc<dyn LocalIndex>,
    download: Arc<dyn DownloadClient>,
    media: Arc<dyn MediaService>,
    max_retries: u32,
    backoff_base: Duration,
    poll_interval: Duration,
    allowed_extensions: Vec<String>,
    slots: Arc<Semaphore>,
    /// Serializes tasks for the same identifier across concurrent chart runs
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AcquisitionExecutor {
    pub fn new(
        pool: SqlitePool,
        local_index: Arc<dyn LocalIndex>,
        download: Arc<dyn DownloadClient>,
        media: Arc<dyn MediaService>,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            pool,
            local_index,
            download,
            media,
            max_retries: config.download_max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            poll_interval: Duration::from_millis(config.backoff_base_ms),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            slots: Arc::new(Semaphore::new(config.download_pool_size.max(1))),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run all tasks to a terminal phase (or until cancellation)
    ///
    /// Task failure domains are isolated: one movie's collaborators failing
    /// never blocks the other tasks.
    pub async fn run_all(
        self: &Arc<Self>,
        tasks: Vec<AcquisitionTask>,
        cancel: &CancellationToken,
    ) -> AcquisitionReport {
        let mut report = AcquisitionReport::default();
        let mut in_flight = FuturesUnordered::new();

        for task in tasks {
            let executor = Arc::clone(self);
            let cancel = cancel.clone();
            in_flight.push(async move {
                // acquire() only fails if the semaphore is closed, which we
                // never do; treat it like cancellation
                let _permit = match executor.slots.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return task,
                };
                executor.run_task(task, &cancel).await
            });
        }

        while let Some(task) = in_flight.next().await {
            match task.phase {
                TaskPhase::Done => report.done.push(task),
                TaskPhase::Abandoned => {
                    tracing::warn!(
                        identifier = %task.censored_id,
                        attempts = task.attempt_count,
                        error = task.last_error.as_deref().unwrap_or("unknown"),
                        "Acquisition abandoned"
                    );
                    report.abandoned.push(task);
                }
                // Cancelled mid-flight; a later gap scan starts fresh
                _ => report.cancelled += 1,
            }
        }

        tracing::info!(
            done = report.done.len(),
            abandoned = report.abandoned.len(),
            cancelled = report.cancelled,
            "Acquisition pass complete"
        );

        report
    }

    /// Drive one task to a terminal phase
    async fn run_task(&self, task: AcquisitionTask, cancel: &CancellationToken) -> AcquisitionTask {
        let lock = self.lock_for(&task.censored_id).await;
        let task = {
            let _guard = lock.lock().await;
            self.run_task_locked(task, cancel).await
        };
        drop(lock);
        self.prune_lock(&task.censored_id).await;
        task
    }

    async fn run_task_locked(
        &self,
        mut task: AcquisitionTask,
        cancel: &CancellationToken,
    ) -> AcquisitionTask {
        let movie = match movies::find_by_guid(&self.pool, task.movie_id).await {
            Ok(Some(movie)) => movie,
            Ok(None) => {
                task.phase = TaskPhase::Abandoned;
                task.last_error = Some(format!("Movie {} missing from catalog", task.movie_id));
                return task;
            }
            Err(e) => {
                task.phase = TaskPhase::Abandoned;
                task.last_error = Some(e.to_string());
                return task;
            }
        };

        while !task.phase.is_terminal() {
            if cancel.is_cancelled() {
                tracing::debug!(identifier = %task.censored_id, "Acquisition cancelled");
                return task;
            }

            match self.attempt_cycle(&mut task, &movie, cancel).await {
                Ok(()) => {}
                Err(e) => self.register_failure(&mut task, e).await,
            }
        }

        task
    }

    /// One pass through the workflow phases; returns Err on a failed attempt
    async fn attempt_cycle(
        &self,
        task: &mut AcquisitionTask,
        movie: &Movie,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        // SEARCHING: re-confirm absence (a concurrent manual acquisition may
        // have landed the file since gap detection)
        task.phase = TaskPhase::Searching;
        match self.local_index.lookup(&task.censored_id).await? {
            LookupResult::Present(path) => {
                tracing::info!(identifier = %task.censored_id, "Already present, skipping download");
                return self.finalize(task, movie, &path).await;
            }
            LookupResult::Ambiguous(candidates) => {
                return Err(SyncError::ResolutionAmbiguity {
                    identifier: task.censored_id.clone(),
                    candidates,
                });
            }
            LookupResult::Absent => {}
        }

        // DOWNLOADING
        task.phase = TaskPhase::Downloading;
        let handle = self.download.submit(movie).await?;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.download.poll_status(&handle).await? {
                DownloadStatus::Done => break,
                DownloadStatus::Failed(reason) => {
                    return Err(SyncError::TransientExternalFailure(format!(
                        "Download failed: {}",
                        reason
                    )));
                }
                DownloadStatus::Pending => tokio::time::sleep(self.poll_interval).await,
            }
        }

        // VERIFYING: the artifact must now be visible locally
        task.phase = TaskPhase::Verifying;
        match self.local_index.lookup(&task.censored_id).await? {
            LookupResult::Present(path) => {
                if !self.extension_allowed(&path) {
                    return Err(SyncError::TransientExternalFailure(format!(
                        "Downloaded artifact {} violates extension policy",
                        path.display()
                    )));
                }
                self.finalize(task, movie, &path).await
            }
            LookupResult::Absent => Err(SyncError::TransientExternalFailure(
                "Download reported done but artifact not visible in local index".to_string(),
            )),
            LookupResult::Ambiguous(candidates) => Err(SyncError::ResolutionAmbiguity {
                identifier: task.censored_id.clone(),
                candidates,
            }),
        }
    }

    /// REGISTERING and bookkeeping once a verified artifact exists
    async fn finalize(
        &self,
        task: &mut AcquisitionTask,
        movie: &Movie,
        path: &Path,
    ) -> SyncResult<()> {
        task.phase = TaskPhase::Registering;
        self.media.register(movie, path).await?;

        movies::set_have_file(&self.pool, movie.guid, true)
            .await
            .map_err(SyncError::Catalog)?;

        task.phase = TaskPhase::Done;
        tracing::info!(identifier = %task.censored_id, path = %path.display(), "Acquisition complete");
        Ok(())
    }

    /// Apply the retry/abandon policy after a failed attempt
    async fn register_failure(&self, task: &mut AcquisitionTask, error: SyncError) {
        task.attempt_count += 1;
        task.last_error = Some(error.to_string());

        // Ambiguity is a manual-review condition, not worth retrying
        if !error.is_retryable() || task.attempt_count > self.max_retries {
            task.phase = TaskPhase::Abandoned;
            return;
        }

        task.phase = TaskPhase::Pending;
        let delay = self.backoff_delay(task.attempt_count);
        tracing::debug!(
            identifier = %task.censored_id,
            attempt = task.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "Attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }

    /// Exponential backoff: base * 2^(attempt-1)
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base * 2_u32.saturating_pow(attempt.saturating_sub(1).min(8))
    }

    async fn lock_for(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no task holds the lock; keeps the map bounded
    /// by in-flight work
    async fn prune_lock(&self, identifier: &str) {
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(identifier) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(identifier);
            }
        }
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.allowed_extensions.contains(&ext.to_lowercase()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskHandle;
    use async_trait::async_trait;
    use chartsync_common::db::create_tables;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Local index that replays a scripted sequence of lookup results,
    /// then repeats the last one
    struct ScriptedIndex {
        script: Mutex<VecDeque<LookupResult>>,
        fallback: LookupResult,
    }

    impl ScriptedIndex {
        fn new(script: Vec<LookupResult>, fallback: LookupResult) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
            }
        }

        fn always(result: LookupResult) -> Self {
            Self::new(Vec::new(), result)
        }
    }

    #[async_trait]
    impl LocalIndex for ScriptedIndex {
        async fn lookup(&self, _identifier: &str) -> crate::types::SyncResult<LookupResult> {
            let next = self.script.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    /// Download client that fails every submit, or succeeds instantly
    struct FakeDownload {
        submits: AtomicUsize,
        fail: bool,
    }

    impl FakeDownload {
        fn failing() -> Self {
            Self {
                submits: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn succeeding() -> Self {
            Self {
                submits: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl DownloadClient for FakeDownload {
        async fn submit(&self, _movie: &Movie) -> crate::types::SyncResult<TaskHandle> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SyncError::TransientExternalFailure(
                    "tracker unreachable".to_string(),
                ))
            } else {
                Ok(TaskHandle("task-1".to_string()))
            }
        }

        async fn poll_status(&self, _handle: &TaskHandle) -> crate::types::SyncResult<DownloadStatus> {
            Ok(DownloadStatus::Done)
        }
    }

    struct FakeMedia {
        registered: AtomicUsize,
    }

    impl FakeMedia {
        fn new() -> Self {
            Self {
                registered: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaService for FakeMedia {
        async fn register(&self, _movie: &Movie, _path: &Path) -> crate::types::SyncResult<()> {
            self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config(max_retries: u32) -> ReconcilerConfig {
        ReconcilerConfig {
            download_max_retries: max_retries,
            backoff_base_ms: 1,
            ..ReconcilerConfig::default()
        }
    }

    async fn fixture(
        index: ScriptedIndex,
        download: FakeDownload,
        config: ReconcilerConfig,
    ) -> (SqlitePool, Arc<FakeDownload>, Arc<FakeMedia>, Arc<AcquisitionExecutor>, AcquisitionTask) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_tables(&pool).await.unwrap();

        let movie = Movie::stub("ABC-001".to_string());
        movies::save_movie(&pool, &movie).await.unwrap();
        let stored = movies::find_by_censored_id(&pool, "ABC-001")
            .await
            .unwrap()
            .unwrap();
        let task = AcquisitionTask::new(stored.guid, stored.censored_id.clone());

        let download = Arc::new(download);
        let media = Arc::new(FakeMedia::new());
        let executor = Arc::new(AcquisitionExecutor::new(
            pool.clone(),
            Arc::new(index),
            Arc::clone(&download) as Arc<dyn DownloadClient>,
            Arc::clone(&media) as Arc<dyn MediaService>,
            &config,
        ));

        (pool, download, media, executor, task)
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_abandons() {
        let (_pool, download, _media, executor, task) = fixture(
            ScriptedIndex::always(LookupResult::Absent),
            FakeDownload::failing(),
            test_config(2),
        )
        .await;

        let report = executor.run_all(vec![task], &CancellationToken::new()).await;

        assert!(report.done.is_empty());
        assert_eq!(report.abandoned.len(), 1);
        let abandoned = &report.abandoned[0];
        assert_eq!(abandoned.phase, TaskPhase::Abandoned);
        // max_retries + 1 attempts, then nothing more
        assert_eq!(abandoned.attempt_count, 3);
        assert_eq!(download.submits.load(Ordering::SeqCst), 3);
        assert!(abandoned.last_error.as_deref().unwrap().contains("tracker unreachable"));
    }

    #[tokio::test]
    async fn test_successful_acquisition_registers_and_marks() {
        let (pool, download, media, executor, task) = fixture(
            ScriptedIndex::new(
                vec![LookupResult::Absent],
                LookupResult::Present(PathBuf::from("/media/ABC-001.mp4")),
            ),
            FakeDownload::succeeding(),
            test_config(2),
        )
        .await;
        let movie_id = task.movie_id;

        let report = executor.run_all(vec![task], &CancellationToken::new()).await;

        assert_eq!(report.done.len(), 1);
        assert_eq!(report.done[0].phase, TaskPhase::Done);
        assert_eq!(download.submits.load(Ordering::SeqCst), 1);
        assert_eq!(media.registered.load(Ordering::SeqCst), 1);

        let loaded = movies::find_by_guid(&pool, movie_id).await.unwrap().unwrap();
        assert!(loaded.have_file);
    }

    #[tokio::test]
    async fn test_already_present_skips_download() {
        let (pool, download, media, executor, task) = fixture(
            ScriptedIndex::always(LookupResult::Present(PathBuf::from("/media/ABC-001.mkv"))),
            FakeDownload::succeeding(),
            test_config(2),
        )
        .await;
        let movie_id = task.movie_id;

        let report = executor.run_all(vec![task], &CancellationToken::new()).await;

        assert_eq!(report.done.len(), 1);
        assert_eq!(download.submits.load(Ordering::SeqCst), 0);
        assert_eq!(media.registered.load(Ordering::SeqCst), 1);

        let loaded = movies::find_by_guid(&pool, movie_id).await.unwrap().unwrap();
        assert!(loaded.have_file);
    }

    #[tokio::test]
    async fn test_ambiguous_match_abandons_without_retry() {
        let (_pool, download, _media, executor, task) = fixture(
            ScriptedIndex::always(LookupResult::Ambiguous(vec![
                PathBuf::from("/media/a.mp4"),
                PathBuf::from("/media/b.mp4"),
            ])),
            FakeDownload::succeeding(),
            test_config(5),
        )
        .await;

        let report = executor.run_all(vec![task], &CancellationToken::new()).await;

        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].attempt_count, 1);
        assert_eq!(download.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extension_policy_rejects_artifact() {
        let (pool, _download, media, executor, task) = fixture(
            ScriptedIndex::new(
                vec![LookupResult::Absent],
                LookupResult::Present(PathBuf::from("/media/ABC-001.iso")),
            ),
            FakeDownload::succeeding(),
            test_config(0),
        )
        .await;
        let movie_id = task.movie_id;

        let report = executor.run_all(vec![task], &CancellationToken::new()).await;

        assert_eq!(report.abandoned.len(), 1);
        assert!(report.abandoned[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("extension policy"));
        assert_eq!(media.registered.load(Ordering::SeqCst), 0);

        let loaded = movies::find_by_guid(&pool, movie_id).await.unwrap().unwrap();
        assert!(!loaded.have_file);
    }

    #[tokio::test]
    async fn test_lock_map_drains_after_run() {
        let (_pool, _download, _media, executor, task) = fixture(
            ScriptedIndex::always(LookupResult::Present(PathBuf::from("/media/ABC-001.mp4"))),
            FakeDownload::succeeding(),
            test_config(2),
        )
        .await;

        executor.run_all(vec![task], &CancellationToken::new()).await;

        assert!(executor.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_leaves_tasks_unfinished() {
        let (_pool, download, _media, executor, task) = fixture(
            ScriptedIndex::always(LookupResult::Absent),
            FakeDownload::failing(),
            test_config(2),
        )
        .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = executor.run_all(vec![task], &cancel).await;

        assert_eq!(report.cancelled, 1);
        assert!(report.done.is_empty() && report.abandoned.is_empty());
        assert_eq!(download.submits.load(Ordering::SeqCst), 0);
    }
}
