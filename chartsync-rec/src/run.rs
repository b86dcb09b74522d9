//! Chart run orchestration
//!
//! Wires fetch → parse → resolve → track → gap-detect → acquire into the
//! operations the CLI exposes. Rows are applied strictly in source order;
//! cancellation is checked between rows and between pipeline stages, never
//! mid-write.

use crate::cache::CacheStore;
use crate::clients::SourceFetcher;
use crate::executor::{AcquisitionExecutor, AcquisitionReport};
use crate::gap::{GapDetector, GapReport};
use crate::parser::{self, extract_identifiers};
use crate::resolver::MovieResolver;
use crate::tracker::{RankHistoryTracker, RowOutcome};
use crate::types::{ChartSource, RawRecord, SyncError, SyncResult};
use chartsync_common::config::ReconcilerConfig;
use chartsync_common::db::movies::MovieDetails;
use chartsync_common::db::{charts, entries};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of one chart run, for the operator-visible report
#[derive(Debug, Default)]
pub struct RunSummary {
    pub chart_name: String,
    /// Rows that passed filters and have an active live entry
    pub recorded: usize,
    /// Of the recorded rows, how many changed and produced a history record
    pub history_written: usize,
    /// Rows that failed thresholds or failed to parse
    pub filtered: usize,
    /// Live entries retired for being absent from this run
    pub retired: usize,
    /// Whether the consecutive-failure cutoff ended the run early
    pub stopped_early: bool,
}

/// The reconciliation pipeline, one instance per process
pub struct ChartPipeline {
    pool: SqlitePool,
    fetcher: Arc<dyn SourceFetcher>,
    resolver: MovieResolver,
    gap: GapDetector,
    executor: Arc<AcquisitionExecutor>,
    config: ReconcilerConfig,
}

impl ChartPipeline {
    pub fn new(
        pool: SqlitePool,
        fetcher: Arc<dyn SourceFetcher>,
        cache: Arc<dyn CacheStore>,
        gap: GapDetector,
        executor: Arc<AcquisitionExecutor>,
        config: ReconcilerConfig,
    ) -> Self {
        let cache_ttl = Duration::from_secs(config.cache_timeout_secs);
        Self {
            resolver: MovieResolver::new(pool.clone(), cache, cache_ttl),
            pool,
            fetcher,
            gap,
            executor,
            config,
        }
    }

    /// Ingest one chart run: fetch, parse, resolve, and track every row
    pub async fn sync_chart(
        &self,
        source: &ChartSource,
        cancel: &CancellationToken,
    ) -> SyncResult<RunSummary> {
        let records = self.fetch_with_retry(source).await?;

        let chart_type = charts::ensure_chart_type(&self.pool, &source.chart_type, "")
            .await
            .map_err(SyncError::Catalog)?;
        let chart = charts::ensure_chart(
            &self.pool,
            &source.chart_name,
            &source.description,
            chart_type.guid,
        )
        .await
        .map_err(SyncError::Catalog)?;

        let mut tracker = RankHistoryTracker::new(self.pool.clone(), chart.guid, &self.config);
        let mut summary = RunSummary {
            chart_name: source.chart_name.clone(),
            ..RunSummary::default()
        };

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(chart = %source.chart_name, "Chart run cancelled");
                break;
            }
            if tracker.stopped() {
                break;
            }

            let row = match parser::parse_record(record, index + 1) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(position = index + 1, error = %e, "Skipping unparseable row");
                    match tracker.record_failure(&e.to_string()) {
                        RowOutcome::Stopped => {
                            summary.filtered += 1;
                            summary.stopped_early = true;
                            break;
                        }
                        _ => {
                            summary.filtered += 1;
                            continue;
                        }
                    }
                }
            };

            let movie = self.resolver.resolve(&row.identifier).await?;

            // A row sometimes carries more than the identifier; keep it
            if row.title.is_some() {
                self.resolver
                    .update_details(
                        &movie,
                        &MovieDetails {
                            name: row.title.clone(),
                            ..MovieDetails::default()
                        },
                    )
                    .await?;
            }

            match tracker.observe(&movie, &row).await? {
                RowOutcome::Recorded { history_written } => {
                    summary.recorded += 1;
                    if history_written {
                        summary.history_written += 1;
                    }
                }
                RowOutcome::Filtered => summary.filtered += 1,
                RowOutcome::Stopped => {
                    summary.filtered += 1;
                    summary.stopped_early = true;
                    break;
                }
            }
        }

        summary.stopped_early = summary.stopped_early || tracker.stopped();

        // Absence can only be judged by a run that scanned the whole source.
        // A cancelled or cutoff-stopped run leaves live entries untouched so
        // the next complete run picks up where this one gave up.
        if !summary.stopped_early && !cancel.is_cancelled() {
            summary.retired = tracker.finish().await?;
        }

        tracing::info!(
            chart = %source.chart_name,
            recorded = summary.recorded,
            history = summary.history_written,
            filtered = summary.filtered,
            retired = summary.retired,
            stopped_early = summary.stopped_early,
            "Chart run complete"
        );

        Ok(summary)
    }

    /// Scan a chart's active entries for movies missing locally
    pub async fn check_gaps(&self, chart_name: &str) -> SyncResult<GapReport> {
        let chart = charts::find_chart_by_name(&self.pool, chart_name)
            .await
            .map_err(SyncError::Catalog)?
            .ok_or_else(|| {
                SyncError::Catalog(chartsync_common::Error::NotFound(format!(
                    "Chart not found: {}",
                    chart_name
                )))
            })?;

        let active = entries::list_active_movie_ids(&self.pool, chart.guid)
            .await
            .map_err(SyncError::Catalog)?;

        self.gap.detect(&active).await
    }

    /// Run gap detection for a chart and acquire everything missing
    pub async fn acquire_gaps(
        &self,
        chart_name: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<(GapReport, AcquisitionReport)> {
        let gaps = self.check_gaps(chart_name).await?;
        let acquisition = self.executor.run_all(gaps.tasks.clone(), cancel).await;
        Ok((gaps, acquisition))
    }

    /// Full pass for one chart: ingest, then acquire the gaps it surfaced
    pub async fn sync_and_acquire(
        &self,
        source: &ChartSource,
        cancel: &CancellationToken,
    ) -> SyncResult<(RunSummary, GapReport, AcquisitionReport)> {
        let summary = self.sync_chart(source, cancel).await?;

        if cancel.is_cancelled() {
            return Ok((summary, GapReport::default(), AcquisitionReport::default()));
        }

        let (gaps, acquisition) = self.acquire_gaps(&source.chart_name, cancel).await?;
        Ok((summary, gaps, acquisition))
    }

    /// Resolve a markdown watch list and acquire whatever is missing
    ///
    /// Watch-list movies bypass chart tracking entirely; they are resolved
    /// into the catalog and fed straight to gap detection.
    pub async fn sync_watch_list(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<(GapReport, AcquisitionReport)> {
        let identifiers = extract_identifiers(text);
        tracing::info!(count = identifiers.len(), "Watch list identifiers extracted");

        let mut movie_ids: Vec<Uuid> = Vec::with_capacity(identifiers.len());
        for identifier in &identifiers {
            if cancel.is_cancelled() {
                break;
            }
            let movie = self.resolver.resolve(identifier).await?;
            movie_ids.push(movie.guid);
        }

        let gaps = self.gap.detect(&movie_ids).await?;
        let acquisition = self.executor.run_all(gaps.tasks.clone(), cancel).await;
        Ok((gaps, acquisition))
    }

    /// Fetch a chart's records, retrying transient failures with backoff
    async fn fetch_with_retry(&self, source: &ChartSource) -> SyncResult<Vec<RawRecord>> {
        let attempts = self.config.scraper_retry_attempts.max(1);
        let base = Duration::from_millis(self.config.backoff_base_ms);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.fetcher.fetch(source).await {
                Ok(records) => {
                    tracing::debug!(
                        chart = %source.chart_name,
                        records = records.len(),
                        attempt,
                        "Fetched chart records"
                    );
                    return Ok(records);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = base * 2_u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        chart = %source.chart_name,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(SyncError::ExhaustedRetries {
            attempts,
            last_error,
        })
    }
}
