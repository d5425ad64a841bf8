//! Attempt Export Worker Service
//!
//! Runs the export scheduler against the Redis job store until Ctrl+C.
//!
//! ## Architecture
//!
//! - **Queue**: Redis keys (`attemptexport:job:{id}`, `attemptexport:waiting`, `attemptexport:status:{code}`)
//! - **Claim lock**: directory marker in `EXPORT_TEMP_DIR`
//! - **Attempts**: JSON snapshots in `ATTEMPT_DATA_DIR`
//! - **Artifacts**: filesystem blob store in `BLOB_ROOT`
//! - **Converter**: wkhtmltopdf
//! - **Telemetry**: OpenTelemetry OTLP export
//!
//! ## Configuration
//!
//! See [`attempt_export::config`] for the settings. In addition:
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: log filter (default: info)
//! - `LOG_FORMAT`: `json` for JSON log lines

use anyhow::{Context, Result};
use attempt_export::blob::FsBlobStore;
use attempt_export::config::ExportConfig;
use attempt_export::converter::WkhtmltopdfConverter;
use attempt_export::export::AttemptExporter;
use attempt_export::inliner::{HttpFetcher, FETCH_TIMEOUT};
use attempt_export::lock::ClaimLock;
use attempt_export::overlay::OverlayRenderer;
use attempt_export::queue::{ExportJobQueue, RedisJobStore};
use attempt_export::scheduler::{ExportScheduler, SchedulerSettings};
use attempt_export::source::JsonAttemptSource;
use attempt_export::telemetry;
use redis::Client;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    telemetry::init_tracing(json_logs);

    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting attempt export worker service");

    let config = ExportConfig::from_env().context("Invalid configuration")?;
    info!(
        autoexport = config.autoexport,
        export_filesystem = config.export_filesystem,
        redis_url = %config.redis_url,
        interval_secs = config.scheduler_interval.as_secs(),
        "Configuration loaded"
    );
    if !config.autoexport {
        warn!("AUTOEXPORT is disabled; scheduler runs will not process jobs");
    }

    let client = Client::open(config.redis_url.as_str()).context("Failed to create Redis client")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");

    let queue = ExportJobQueue::new(Arc::new(RedisJobStore::new(conn)));
    let blobs = Arc::new(FsBlobStore::new(&config.blob_root));
    let source = Arc::new(JsonAttemptSource::new(&config.attempt_data_dir));
    let converter = Arc::new(WkhtmltopdfConverter::new(
        &config.wkhtmltopdf_binary,
        &config.temp_dir,
    ));
    let fetcher = Arc::new(HttpFetcher::new(FETCH_TIMEOUT).context("Failed to build HTTP client")?);

    let exporter = AttemptExporter::from_config(
        &config,
        source,
        blobs,
        converter,
        fetcher,
        OverlayRenderer::new(),
    );
    let scheduler = ExportScheduler::new(
        queue,
        ClaimLock::in_dir(&config.temp_dir),
        Arc::new(exporter),
        SchedulerSettings::from_config(&config),
    );

    let shutdown = CancellationToken::new();
    let runner = {
        let shutdown = shutdown.clone();
        let interval = config.scheduler_interval;
        tokio::spawn(async move { scheduler.run_forever(interval, shutdown).await })
    };

    info!("Worker service ready, press Ctrl+C to shutdown");
    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;

    info!("Received shutdown signal, finishing the current run...");
    shutdown.cancel();
    runner.await.context("Scheduler task failed")?;

    info!("Worker service shutdown complete");
    Ok(())
}
