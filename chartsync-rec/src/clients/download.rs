//! Download daemon client
//!
//! One concrete `DownloadClient` backend: a torrent daemon fronted by a small
//! JSON API (submit a job by identifier, poll it by task id). Alternative
//! backends implement the same trait.

use crate::clients::DownloadClient;
use crate::types::{DownloadStatus, SyncResult, TaskHandle};
use async_trait::async_trait;
use chartsync_common::config::EndpointConfig;
use chartsync_common::db::movies::Movie;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    identifier: &'a str,
    /// Serial number when the catalog carries one, improves daemon-side search
    serial_number: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the download daemon
pub struct HttpDownloadClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDownloadClient {
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

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl DownloadClient for HttpDownloadClient {
    async fn submit(&self, movie: &Movie) -> SyncResult<TaskHandle> {
        let url = format!("{}/downloads", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .json(&SubmitRequest {
                identifier: &movie.censored_id,
                serial_number: movie.serial_number.as_deref(),
            })
            .send()
            .await?
            .error_for_status()?;

        let body: SubmitResponse = response.json().await?;
        tracing::info!(identifier = %movie.censored_id, task_id = %body.task_id, "Download submitted");

        Ok(TaskHandle(body.task_id))
    }

    async fn poll_status(&self, handle: &TaskHandle) -> SyncResult<DownloadStatus> {
        let url = format!("{}/downloads/{}", self.base_url, handle.0);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?;

        let body: StatusResponse = response.json().await?;

        let status = match body.state.as_str() {
            "done" => DownloadStatus::Done,
            "failed" => DownloadStatus::Failed(
                body.error.unwrap_or_else(|| "unspecified daemon failure".to_string()),
            ),
            // "queued", "downloading", anything in-flight
            _ => DownloadStatus::Pending,
        };

        Ok(status)
    }
}
