//! File-backed chart source
//!
//! Reads pre-parsed chart records from a JSON file. Scraping mechanics live
//! outside this pipeline; whatever fetches and parses the remote pages drops
//! its rows here (or implements `SourceFetcher` directly).

use crate::clients::SourceFetcher;
use crate::types::{ChartSource, RawRecord, SortMode, SyncError, SyncResult};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::path::PathBuf;

/// Loads one chart run's records from `<dir>/<chart_name>.json`
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl SourceFetcher for JsonFileSource {
    async fn fetch(&self, source: &ChartSource) -> SyncResult<Vec<RawRecord>> {
        let path = self.dir.join(format!("{}.json", source.chart_name));

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            SyncError::TransientExternalFailure(format!("Read {} failed: {}", path.display(), e))
        })?;

        let records: Vec<RawRecord> = serde_json::from_str(&content)
            .map_err(|e| SyncError::ParseFailure(format!("Bad source file {}: {}", path.display(), e)))?;

        tracing::debug!(
            chart = %source.chart_name,
            records = records.len(),
            "Loaded chart source file"
        );

        Ok(order_records(records, source.sort_mode))
    }
}

/// Put records into the chart's declared order before they reach the parser,
/// so downstream consumers only ever see uniform source order
fn order_records(mut records: Vec<RawRecord>, mode: SortMode) -> Vec<RawRecord> {
    match mode {
        // Stable sorts: unranked/unscored records keep their file order, at
        // the end
        SortMode::ByRank => records.sort_by_key(|r| r.rank.unwrap_or(i64::MAX)),
        SortMode::ByScore => records.sort_by(|a, b| {
            b.score
                .unwrap_or(f64::MIN)
                .partial_cmp(&a.score.unwrap_or(f64::MIN))
                .unwrap_or(Ordering::Equal)
        }),
        // Snapshot files for date-ordered charts are written in date order
        SortMode::ByDate => {}
    }
    records
}
