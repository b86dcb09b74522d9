//! Everything local file index client
//!
//! Talks to the Everything HTTP server's JSON API to check whether a title
//! already exists in local holdings.

use crate::clients::LocalIndex;
use crate::types::{LookupResult, SyncResult};
use async_trait::async_trait;
use chartsync_common::config::EndpointConfig;
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    path: String,
    name: String,
}

/// Client for the Everything HTTP search endpoint
pub struct EverythingClient {
    client: Client,
    base_url: String,
}

impl EverythingClient {
    /// Create client with the configured endpoint and call timeout
    pub fn new(config: &EndpointConfig, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LocalIndex for EverythingClient {
    async fn lookup(&self, identifier: &str) -> SyncResult<LookupResult> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search", identifier),
                ("json", "1"),
                ("path_column", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: SearchResponse = response.json().await?;

        let mut paths: Vec<PathBuf> = body
            .results
            .into_iter()
            .map(|hit| PathBuf::from(hit.path).join(hit.name))
            .collect();

        tracing::debug!(identifier, hits = paths.len(), "Local index lookup");

        match paths.len() {
            0 => Ok(LookupResult::Absent),
            1 => Ok(LookupResult::Present(paths.remove(0))),
            _ => Ok(LookupResult::Ambiguous(paths)),
        }
    }
}
