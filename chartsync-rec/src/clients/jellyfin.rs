//! Jellyfin media service client
//!
//! Notifies Jellyfin that a new media file exists so the library picks it up
//! without waiting for a scheduled scan.

use crate::clients::MediaService;
use crate::types::SyncResult;
use async_trait::async_trait;
use chartsync_common::config::EndpointConfig;
use chartsync_common::db::movies::Movie;
use reqwest::Client;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// Client for the Jellyfin library API
pub struct JellyfinClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JellyfinClient {
    pub fn new(config: &EndpointConfig, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl MediaService for JellyfinClient {
    async fn register(&self, movie: &Movie, local_path: &Path) -> SyncResult<()> {
        let url = format!("{}/Library/Media/Updated", self.base_url);

        let mut request = self.client.post(&url).json(&json!({
            "Updates": [{
                "Path": local_path.display().to_string(),
                "UpdateType": "Created",
            }]
        }));

        if let Some(key) = &self.api_key {
            request = request.header("X-Emby-Token", key);
        }

        request.send().await?.error_for_status()?;

        tracing::info!(
            identifier = %movie.censored_id,
            path = %local_path.display(),
            "Registered with media service"
        );

        Ok(())
    }
}
