//! Rank history tracker
//!
//! Per-run state machine: `SCANNING → FILTER_FAILING → STOPPED`. Rows are
//! applied strictly in source order. A row failing the configured thresholds
//! bumps the consecutive-failure counter; hitting the cutoff abandons the
//! remainder of the run, since charts arrive in descending desirability order
//! and a run of failures signals the productive prefix has ended.
//!
//! History captures *change*: a ChartHistory record is appended only when the
//! observed rank/score/votes differ from the stored live snapshot.

use crate::types::{ChartRow, SyncError, SyncResult};
use chartsync_common::config::ReconcilerConfig;
use chartsync_common::db::entries::{self, ChartEntry, EntryStatus};
use chartsync_common::db::history::{self, HistoryRecord};
use chartsync_common::db::movies::Movie;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

/// Tracker state for one chart run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Processing rows normally
    Scanning,
    /// At least one consecutive filter failure; still processing
    FilterFailing,
    /// Cutoff reached; remaining rows in this run are not processed
    Stopped,
}

/// What happened to one observed row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Row passed filters; live entry is active. `history_written` is false
    /// when the observed values matched the stored snapshot exactly.
    Recorded { history_written: bool },
    /// Row failed thresholds (or failed to parse); counter incremented
    Filtered,
    /// This failure reached the cutoff; the run is over
    Stopped,
}

/// Tracks one chart run against the live entries and history tables
pub struct RankHistoryTracker {
    pool: SqlitePool,
    chart_id: Uuid,
    min_votes: i64,
    min_score: f64,
    failure_cutoff: u32,
    state: RunState,
    consecutive_failures: u32,
    /// Movies observed this run (passing or filtered); everything else with a
    /// live entry gets retired in `finish`
    seen: HashSet<Uuid>,
}

impl RankHistoryTracker {
    pub fn new(pool: SqlitePool, chart_id: Uuid, config: &ReconcilerConfig) -> Self {
        Self {
            pool,
            chart_id,
            min_votes: config.min_votes as i64,
            min_score: config.min_score,
            failure_cutoff: config.failure_cutoff,
            state: RunState::Scanning,
            consecutive_failures: 0,
            seen: HashSet::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the run has hit the cutoff
    pub fn stopped(&self) -> bool {
        self.state == RunState::Stopped
    }

    /// Apply one resolved row in source order
    pub async fn observe(&mut self, movie: &Movie, row: &ChartRow) -> SyncResult<RowOutcome> {
        if self.stopped() {
            return Ok(RowOutcome::Stopped);
        }

        self.seen.insert(movie.guid);

        if row.votes < self.min_votes || row.score < self.min_score {
            tracing::debug!(
                identifier = %row.identifier,
                score = row.score,
                votes = row.votes,
                "Row failed filter thresholds"
            );

            // An entry that previously existed stays visible but drops out of
            // gap scans; a first-sighting failure is not persisted at all.
            if self.live_entry(movie.guid).await?.is_some() {
                entries::set_entry_status(
                    &self.pool,
                    self.chart_id,
                    movie.guid,
                    EntryStatus::Filtered,
                )
                .await
                .map_err(SyncError::Catalog)?;
            }

            return Ok(self.register_failure(&row.identifier));
        }

        // Row passed: back to scanning
        self.consecutive_failures = 0;
        self.state = RunState::Scanning;

        let existing = self.live_entry(movie.guid).await?;

        let changed = match &existing {
            None => true,
            Some(entry) => {
                entry.rank != row.rank
                    || entry.votes != row.votes
                    || (entry.score - row.score).abs() > f64::EPSILON
            }
        };

        if changed {
            history::append_history(
                &self.pool,
                &HistoryRecord {
                    chart_id: self.chart_id,
                    movie_id: movie.guid,
                    rank: row.rank,
                    score: row.score,
                    votes: row.votes,
                    recorded_at: Utc::now(),
                },
            )
            .await
            .map_err(SyncError::Catalog)?;

            entries::upsert_live_entry(
                &self.pool,
                &ChartEntry {
                    guid: existing.as_ref().map(|e| e.guid).unwrap_or_else(Uuid::new_v4),
                    chart_id: self.chart_id,
                    movie_id: movie.guid,
                    rank: row.rank,
                    score: row.score,
                    votes: row.votes,
                    status: EntryStatus::Active,
                },
            )
            .await
            .map_err(SyncError::Catalog)?;
        } else if existing.as_ref().map(|e| e.status) != Some(EntryStatus::Active) {
            // Same values but the entry had been filtered or retired;
            // reactivate without a history write
            entries::set_entry_status(&self.pool, self.chart_id, movie.guid, EntryStatus::Active)
                .await
                .map_err(SyncError::Catalog)?;
        }

        Ok(RowOutcome::Recorded {
            history_written: changed,
        })
    }

    /// Count a row-level failure that never reached `observe` (parse error,
    /// per-row fetch error). Feeds the same consecutive-failure budget.
    pub fn record_failure(&mut self, context: &str) -> RowOutcome {
        if self.stopped() {
            return RowOutcome::Stopped;
        }
        self.register_failure(context)
    }

    fn register_failure(&mut self, context: &str) -> RowOutcome {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.failure_cutoff {
            self.state = RunState::Stopped;
            tracing::info!(
                chart_id = %self.chart_id,
                failures = self.consecutive_failures,
                context,
                "Consecutive-failure cutoff reached, abandoning rest of run"
            );
            return RowOutcome::Stopped;
        }

        self.state = RunState::FilterFailing;
        RowOutcome::Filtered
    }

    /// Retire live entries not observed in this run
    ///
    /// Returns the number of entries retired. Retirement writes no history;
    /// the entry stays queryable but leaves acquisition-gap scans.
    pub async fn finish(&mut self) -> SyncResult<usize> {
        let live = entries::list_live_movie_ids(&self.pool, self.chart_id)
            .await
            .map_err(SyncError::Catalog)?;

        let mut retired = 0;
        for movie_id in live {
            if !self.seen.contains(&movie_id) {
                entries::set_entry_status(
                    &self.pool,
                    self.chart_id,
                    movie_id,
                    EntryStatus::Retired,
                )
                .await
                .map_err(SyncError::Catalog)?;
                retired += 1;
            }
        }

        if retired > 0 {
            tracing::info!(chart_id = %self.chart_id, retired, "Retired absent entries");
        }

        Ok(retired)
    }

    async fn live_entry(&self, movie_id: Uuid) -> SyncResult<Option<ChartEntry>> {
        let mut rows = entries::find_live_entries(&self.pool, self.chart_id, movie_id)
            .await
            .map_err(SyncError::Catalog)?;

        if rows.len() > 1 {
            // Someone outside this pipeline broke the unique constraint;
            // overwriting here would destroy evidence
            return Err(SyncError::InvariantViolation(format!(
                "Duplicate live chart entries for chart {} movie {}",
                self.chart_id, movie_id
            )));
        }

        Ok(rows.pop())
    }
}
