//! Domain types and error taxonomy for the reconciliation pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for pipeline operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Pipeline error taxonomy
///
/// Row-level failures (`ParseFailure`) feed the consecutive-failure cutoff and
/// never abort a run on their own. Per-task failures are isolated: one movie's
/// acquisition failing never blocks the others.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A raw record could not be turned into a ChartRow
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// The local index returned multiple candidate matches; needs manual review
    #[error("Ambiguous local matches for {identifier}: {candidates:?}")]
    ResolutionAmbiguity {
        identifier: String,
        candidates: Vec<PathBuf>,
    },

    /// Timeout or network failure on a collaborator call; retryable
    #[error("Transient external failure: {0}")]
    TransientExternalFailure(String),

    /// The bounded retry budget for a task was spent
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    /// Catalog state contradicts a pipeline invariant; fatal to the current run
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Catalog store error
    #[error(transparent)]
    Catalog(#[from] chartsync_common::Error),
}

impl SyncError {
    /// Whether a bounded retry is worth attempting
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientExternalFailure(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        // Any HTTP-level failure (timeout, connect, decode) is transient from
        // the pipeline's point of view; the attempt budget bounds it.
        SyncError::TransientExternalFailure(e.to_string())
    }
}

/// One record as delivered by a source fetcher, before normalization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source-side identifier text (e.g. "abp-123"); may need normalization
    pub identifier: String,
    /// Rank as published; absent when the source relies on presentation order
    pub rank: Option<i64>,
    pub score: Option<f64>,
    pub votes: Option<i64>,
    /// Display title, when the source carries one
    pub title: Option<String>,
}

/// Normalized chart row, the parser's output
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRow {
    pub rank: i64,
    /// Normalized identifier (uppercase, canonical hyphen)
    pub identifier: String,
    pub score: f64,
    pub votes: i64,
    pub title: Option<String>,
}

/// How a source site orders its listing
///
/// Site-specific sort semantics stay inside the fetcher; by the time rows
/// reach the tracker they are uniform ChartRows in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    ByRank,
    ByScore,
    ByDate,
}

/// One configured chart source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSource {
    pub chart_name: String,
    pub chart_type: String,
    #[serde(default)]
    pub description: String,
    pub sort_mode: SortMode,
}

/// Local index classification for one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LookupResult {
    Absent,
    Present(PathBuf),
    Ambiguous(Vec<PathBuf>),
}

/// Opaque handle to a submitted download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle(pub String);

/// Download client poll result
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    Pending,
    Done,
    Failed(String),
}

/// Acquisition workflow phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Searching,
    Downloading,
    Verifying,
    Registering,
    Done,
    Abandoned,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Done | TaskPhase::Abandoned)
    }
}

/// Ephemeral state for one movie moving through search → download → verify →
/// register. Never persisted; a later gap detection creates a fresh task.
#[derive(Debug, Clone)]
pub struct AcquisitionTask {
    pub movie_id: Uuid,
    pub censored_id: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub phase: TaskPhase,
}

impl AcquisitionTask {
    pub fn new(movie_id: Uuid, censored_id: String) -> Self {
        Self {
            movie_id,
            censored_id,
            attempt_count: 0,
            last_error: None,
            phase: TaskPhase::Pending,
        }
    }
}
