//! External collaborator interfaces and their HTTP implementations
//!
//! Each collaborator is a capability trait so the pipeline can be exercised
//! against fakes in tests. Adding a backend means adding another trait
//! implementation, not branching on a type tag.

pub mod everything;
pub mod download;
pub mod jellyfin;
pub mod source_file;

pub use download::HttpDownloadClient;
pub use everything::EverythingClient;
pub use jellyfin::JellyfinClient;
pub use source_file::JsonFileSource;

use crate::types::{
    ChartSource, DownloadStatus, LookupResult, RawRecord, SyncResult, TaskHandle,
};
use async_trait::async_trait;
use chartsync_common::db::movies::Movie;
use std::path::Path;

/// Delivers the raw records of one chart run
///
/// Fetch failures are surfaced to the caller, which treats them as row-level
/// failures feeding the consecutive-failure counter.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &ChartSource) -> SyncResult<Vec<RawRecord>>;
}

/// Queries local holdings for a verified copy of one title
#[async_trait]
pub trait LocalIndex: Send + Sync {
    async fn lookup(&self, identifier: &str) -> SyncResult<LookupResult>;
}

/// Submits downloads and reports their progress
#[async_trait]
pub trait DownloadClient: Send + Sync {
    async fn submit(&self, movie: &Movie) -> SyncResult<TaskHandle>;
    async fn poll_status(&self, handle: &TaskHandle) -> SyncResult<DownloadStatus>;
}

/// Notifies the playback service that a new item exists
#[async_trait]
pub trait MediaService: Send + Sync {
    async fn register(&self, movie: &Movie, local_path: &Path) -> SyncResult<()>;
}
