//! chartsync - Chart reconciliation and acquisition pipeline
//!
//! Ingests external ranking charts into the local movie catalog, keeps an
//! append-only rank history, and acquires titles the local library is
//! missing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chartsync_common::config::{load_config, resolve_database_path, TomlConfig};
use chartsync_common::db::init_database;
use chartsync_rec::cache::{CacheStore, MemoryCache};
use chartsync_rec::clients::{
    EverythingClient, HttpDownloadClient, JellyfinClient, JsonFileSource, LocalIndex,
};
use chartsync_rec::executor::AcquisitionExecutor;
use chartsync_rec::gap::GapDetector;
use chartsync_rec::run::ChartPipeline;
use chartsync_rec::types::{ChartSource, SortMode};

/// Command-line arguments for chartsync
#[derive(Parser, Debug)]
#[command(name = "chartsync")]
#[command(about = "Chart reconciliation and acquisition pipeline")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "chartsync.toml", env = "CHARTSYNC_CONFIG")]
    config: PathBuf,

    /// Path to the catalog database (overrides config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Directory holding chart snapshot files (<chart>.json)
    #[arg(long, default_value = "charts", env = "CHARTSYNC_SOURCE_DIR")]
    source_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a chart run and acquire the gaps it surfaces
    Sync {
        /// Chart name (also names the snapshot file)
        #[arg(long)]
        chart: String,

        /// Chart type the chart belongs to
        #[arg(long, default_value = "top-n")]
        chart_type: String,

        /// Source ordering: by_rank, by_score, or by_date
        #[arg(long, default_value = "by_rank")]
        sort: String,

        /// Ingest only; skip gap detection and acquisition
        #[arg(long)]
        no_acquire: bool,
    },

    /// Report which active chart entries are missing locally
    Check {
        #[arg(long)]
        chart: String,
    },

    /// Acquire the missing titles of a previously ingested chart
    Acquire {
        #[arg(long)]
        chart: String,
    },

    /// Resolve a markdown watch list and acquire what is missing
    Watchlist {
        /// Path to the markdown file
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chartsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = load_config(&cli.config).context("Failed to load configuration")?;
    let db_path = resolve_database_path(cli.database.as_deref(), &config);

    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize catalog database")?;
    info!("Catalog database ready at {}", db_path.display());

    let pipeline = build_pipeline(&pool, &config, &cli.source_dir)?;
    let cancel = shutdown_token();

    match cli.command {
        Command::Sync {
            chart,
            chart_type,
            sort,
            no_acquire,
        } => {
            let source = ChartSource {
                chart_name: chart,
                chart_type,
                description: String::new(),
                sort_mode: parse_sort(&sort)?,
            };

            if no_acquire {
                let summary = pipeline.sync_chart(&source, &cancel).await?;
                print_summary(&summary);
            } else {
                let (summary, gaps, acquisition) =
                    pipeline.sync_and_acquire(&source, &cancel).await?;
                print_summary(&summary);
                print_gaps(&gaps);
                print_acquisition(&acquisition);
            }
        }

        Command::Check { chart } => {
            let gaps = pipeline.check_gaps(&chart).await?;
            print_gaps(&gaps);
            for task in &gaps.tasks {
                println!("missing  {}", task.censored_id);
            }
            for ambiguous in &gaps.ambiguous {
                println!(
                    "ambiguous  {} ({} candidates)",
                    ambiguous.censored_id,
                    ambiguous.candidates.len()
                );
            }
        }

        Command::Acquire { chart } => {
            let (gaps, acquisition) = pipeline.acquire_gaps(&chart, &cancel).await?;
            print_gaps(&gaps);
            print_acquisition(&acquisition);
        }

        Command::Watchlist { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read watch list {}", file.display()))?;
            let (gaps, acquisition) = pipeline.sync_watch_list(&text, &cancel).await?;
            print_gaps(&gaps);
            print_acquisition(&acquisition);
        }
    }

    Ok(())
}

fn build_pipeline(
    pool: &sqlx::SqlitePool,
    config: &TomlConfig,
    source_dir: &std::path::Path,
) -> Result<ChartPipeline> {
    let tuning = config.reconciler.clone();
    let timeout = Duration::from_secs(tuning.external_timeout_secs);
    let cache_ttl = Duration::from_secs(tuning.cache_timeout_secs);

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let local_index: Arc<dyn LocalIndex> = Arc::new(
        EverythingClient::new(&config.local_index, timeout)
            .context("Failed to build local index client")?,
    );
    let download = Arc::new(
        HttpDownloadClient::new(&config.download_client, timeout)
            .context("Failed to build download client")?,
    );
    let media = Arc::new(
        JellyfinClient::new(&config.media_service, timeout)
            .context("Failed to build media service client")?,
    );
    let fetcher = Arc::new(JsonFileSource::new(source_dir.to_path_buf()));

    let gap = GapDetector::new(
        pool.clone(),
        Arc::clone(&local_index),
        Arc::clone(&cache),
        cache_ttl,
    );
    let executor = Arc::new(AcquisitionExecutor::new(
        pool.clone(),
        local_index,
        download,
        media,
        &tuning,
    ));

    Ok(ChartPipeline::new(
        pool.clone(),
        fetcher,
        cache,
        gap,
        executor,
        tuning,
    ))
}

fn parse_sort(s: &str) -> Result<SortMode> {
    match s {
        "by_rank" => Ok(SortMode::ByRank),
        "by_score" => Ok(SortMode::ByScore),
        "by_date" => Ok(SortMode::ByDate),
        other => anyhow::bail!("Unknown sort mode: {} (expected by_rank, by_score, by_date)", other),
    }
}

fn print_summary(summary: &chartsync_rec::run::RunSummary) {
    println!(
        "chart {}: {} recorded ({} history), {} filtered, {} retired{}",
        summary.chart_name,
        summary.recorded,
        summary.history_written,
        summary.filtered,
        summary.retired,
        if summary.stopped_early {
            ", stopped early"
        } else {
            ""
        }
    );
}

fn print_gaps(gaps: &chartsync_rec::gap::GapReport) {
    println!(
        "gaps: {} missing, {} present, {} ambiguous, {} skipped",
        gaps.tasks.len(),
        gaps.present.len(),
        gaps.ambiguous.len(),
        gaps.skipped
    );
}

fn print_acquisition(report: &chartsync_rec::executor::AcquisitionReport) {
    println!(
        "acquisition: {} done, {} abandoned, {} cancelled",
        report.done.len(),
        report.abandoned.len(),
        report.cancelled
    );
    for task in &report.abandoned {
        println!(
            "abandoned  {} after {} attempts: {}",
            task.censored_id,
            task.attempt_count,
            task.last_error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Cancellation token wired to Ctrl+C / SIGTERM
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if signal::ctrl_c().await.is_err() {
                return;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, finishing current writes"),
            _ = terminate => info!("Received SIGTERM, finishing current writes"),
        }

        trigger.cancel();
    });

    token
}
