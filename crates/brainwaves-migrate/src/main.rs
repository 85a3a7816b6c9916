//! Migration entry point.
//!
//! Moves one channel of a recording through a `RedisTimeSeries` staging
//! series into a `TimescaleDB` hypertable, then deletes the series. The
//! process runs once and exits.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `brainwaves-config.yaml` (defaults if absent)
//! 2. Apply environment overrides and validate
//! 3. Initialize structured logging (tracing)
//! 4. Connect to `PostgreSQL` (with retries) and Redis
//! 5. Run the pipeline and log the report
//!
//! Exits non-zero with the error chain on any failure.

use std::path::Path;

use anyhow::Context;
use brainwaves_core::config::LoggingConfig;
use brainwaves_core::{LiveBackends, MigrationConfig, RecordingSource, migrate};
use brainwaves_db::TokioSleeper;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "brainwaves-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, a connection cannot be
/// established, or any pipeline stage fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    init_tracing(&config.logging);
    info!("brainwaves-migrate starting");
    info!(
        postgres_host = config.postgres.host,
        postgres_port = config.postgres.port,
        database = config.postgres.database,
        table = config.postgres.table,
        redis_url = config.cache.url(),
        series_key = config.cache.series_key,
        retention_ms = config.cache.retention_ms,
        recording = %config.source.path.display(),
        channel = %config.source.channel,
        "Configuration loaded"
    );

    let backends = LiveBackends::new(&config, TokioSleeper);
    let source = RecordingSource::new(&config.source.path, config.source.channel.clone());
    let settings = config.pipeline_settings();

    let report = migrate(&backends, &source, &settings)
        .await
        .context("migration failed")?;

    info!(
        run_id = %report.run_id,
        samples_loaded = report.samples_loaded,
        samples_cached = report.samples_cached,
        samples_read = report.samples_read,
        rows_persisted = report.rows_persisted,
        evicted = report.evicted,
        "brainwaves-migrate finished"
    );

    Ok(())
}

/// Load `brainwaves-config.yaml` from the working directory if present,
/// then apply environment overrides.
fn load_config() -> anyhow::Result<MigrationConfig> {
    let path = Path::new(CONFIG_FILE);
    let mut config = if path.exists() {
        MigrationConfig::from_file(path).with_context(|| format!("reading {CONFIG_FILE}"))?
    } else {
        MigrationConfig::default()
    };
    config
        .apply_overrides(|name| std::env::var(name).ok())
        .context("applying environment overrides")?;
    config.validate()?;
    Ok(config)
}

/// `RUST_LOG` wins over `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
