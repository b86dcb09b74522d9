//! Configuration loading for chartsync
//!
//! Resolution priority for each value: environment variable, then TOML config
//! file, then compiled default. The loading mechanism lives here; the
//! reconciler consumes only the resolved values.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level TOML configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the catalog SQLite database
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Local file index service (Everything-style HTTP search)
    #[serde(default)]
    pub local_index: EndpointConfig,

    /// Download client service (qBittorrent-style Web API)
    #[serde(default)]
    pub download_client: EndpointConfig,

    /// Media playback service (Jellyfin-style API)
    #[serde(default)]
    pub media_service: EndpointConfig,
}

/// One external collaborator endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    /// API key or token, where the service requires one
    pub api_key: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            api_key: None,
        }
    }
}

/// Tuning values consumed by the reconciliation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Rows with fewer votes than this fail filtering
    pub min_votes: u32,
    /// Rows scoring below this fail filtering
    pub min_score: f64,
    /// Consecutive filter failures before a chart run is abandoned
    pub failure_cutoff: u32,
    /// Retry attempts for a failed source fetch
    pub scraper_retry_attempts: u32,
    /// Maximum download retry attempts before a task is abandoned
    pub download_max_retries: u32,
    /// Reconciliation cache entry lifetime, seconds
    pub cache_timeout_secs: u64,
    /// In-flight download slots in the acquisition worker pool
    pub download_pool_size: usize,
    /// Timeout applied to every external collaborator call, seconds
    pub external_timeout_secs: u64,
    /// Base delay for retry backoff, milliseconds (doubles per attempt)
    pub backoff_base_ms: u64,
    /// File extensions accepted when verifying a downloaded artifact
    pub allowed_extensions: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            min_votes: 200,
            min_score: 3.5,
            failure_cutoff: 5,
            scraper_retry_attempts: 3,
            download_max_retries: 3,
            cache_timeout_secs: 600,
            download_pool_size: 4,
            external_timeout_secs: 15,
            backoff_base_ms: 500,
            allowed_extensions: vec![
                "mp4".to_string(),
                "mkv".to_string(),
                "avi".to_string(),
                "wmv".to_string(),
            ],
        }
    }
}

/// Load configuration from a TOML file, or defaults if the file is absent
pub fn load_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::info!("No config file at {}, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the database path following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. `CHARTSYNC_DB` environment variable
/// 3. TOML config file
/// 4. Compiled default (`./chartsync.db`)
pub fn resolve_database_path(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var("CHARTSYNC_DB") {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    PathBuf::from("chartsync.db")
}
