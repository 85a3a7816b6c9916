//! Migration driver and stage state machine.
//!
//! One run moves one recording channel through the cache into the
//! hypertable:
//!
//! ```text
//! Init -> BootstrapConnections -> LoadSource -> WriteCache -> ReadCache
//!      -> EnsureSchema -> CommitPersistence -> EvictCache -> Done
//! ```
//!
//! Any stage failure moves the run to `Failed`. Only the connection
//! bootstrap is retried; every other failure aborts the run.
//!
//! The series key is treated as a scoped resource. Once `TS.CREATE` has
//! succeeded, the key is deleted on every exit path. A failed eviction after
//! a failed stage is logged and the stage error is returned; a failed
//! eviction after a successful transfer fails the run at `EvictCache`.

use std::future::Future;

use brainwaves_db::{
    DbError, PostgresConfig, PostgresPool, RedisSeriesCache, RetryPolicy, SampleSink,
    SampleStore, SeriesCache, Sleeper,
};
use brainwaves_types::{RangeBound, RunId, Sample, expected_retained};
use tracing::{Instrument, error, info, warn};

use crate::config::MigrationConfig;
use crate::source::{SampleSource, SourceError};

/// Stages of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Nothing has happened yet.
    Init,
    /// Connecting to the database (with retries) and the cache.
    BootstrapConnections,
    /// Loading samples from the recording.
    LoadSource,
    /// Creating the series and appending samples.
    WriteCache,
    /// Reading the series back.
    ReadCache,
    /// Creating the table, extension and hypertable if needed.
    EnsureSchema,
    /// Inserting all rows in one transaction.
    CommitPersistence,
    /// Deleting the series key.
    EvictCache,
    /// The run completed.
    Done,
    /// The run stopped on an error.
    Failed,
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::BootstrapConnections => "bootstrap_connections",
            Self::LoadSource => "load_source",
            Self::WriteCache => "write_cache",
            Self::ReadCache => "read_cache",
            Self::EnsureSchema => "ensure_schema",
            Self::CommitPersistence => "commit_persistence",
            Self::EvictCache => "evict_cache",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What went wrong in a failed stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineErrorKind {
    /// The database stayed unreachable after all attempts, or the cache
    /// could not be reached.
    #[error("connection error: {0}")]
    Connection(#[source] DbError),

    /// The recording could not be loaded.
    #[error("source load error: {0}")]
    SourceLoad(#[from] SourceError),

    /// A cache command failed.
    #[error("cache operation error: {0}")]
    CacheOperation(#[source] DbError),

    /// The cache read returned a different number of samples than the
    /// retention window should have kept.
    #[error("incomplete read: expected {expected} samples, read {read}")]
    IncompleteRead {
        /// Samples the retention window should have kept.
        expected: usize,
        /// Samples actually read.
        read: usize,
    },

    /// Schema creation or the insert transaction failed.
    #[error("persistence error: {0}")]
    Persistence(#[source] DbError),
}

/// A failed run: the stage it failed in and why.
#[derive(Debug, thiserror::Error)]
#[error("migration failed at stage {stage}")]
pub struct PipelineError {
    /// The stage that was running.
    pub stage: Stage,
    /// The cause.
    #[source]
    pub kind: PipelineErrorKind,
}

impl PipelineError {
    /// Create an error for `stage`.
    pub const fn new(stage: Stage, kind: PipelineErrorKind) -> Self {
        Self { stage, kind }
    }
}

/// Per-run settings for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Series key the recording is staged under.
    pub series_key: String,
    /// Retention window in milliseconds (`0` keeps everything).
    pub retention_ms: u64,
    /// Delete a leftover key before creating it.
    pub clear_stale_series: bool,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// The run identifier.
    pub run_id: RunId,
    /// Samples produced by the source.
    pub samples_loaded: usize,
    /// Samples appended to the cache.
    pub samples_cached: usize,
    /// Samples read back from the cache.
    pub samples_read: usize,
    /// Rows committed to the hypertable.
    pub rows_persisted: u64,
    /// Whether the series key existed when it was deleted.
    pub evicted: bool,
}

/// Counts from the stages between series creation and eviction.
struct Transfer {
    cached: usize,
    read: usize,
    persisted: u64,
}

fn enter(stage: Stage) {
    info!(stage = %stage, "Entering stage");
}

fn fail(stage: Stage, kind: PipelineErrorKind) -> PipelineError {
    error!(stage = %stage, error = %kind, "Stage failed");
    PipelineError::new(stage, kind)
}

/// Drives one run against an already connected cache and sink.
pub struct Pipeline<'a, C, K> {
    cache: &'a C,
    sink: &'a K,
    settings: &'a PipelineSettings,
}

impl<'a, C: SeriesCache, K: SampleSink> Pipeline<'a, C, K> {
    /// Create a driver over `cache` and `sink`.
    pub const fn new(cache: &'a C, sink: &'a K, settings: &'a PipelineSettings) -> Self {
        Self {
            cache,
            sink,
            settings,
        }
    }

    /// Run every stage from `LoadSource` through `EvictCache`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] naming the stage that failed. The series
    /// key has been evicted (or an eviction attempted) whenever it was
    /// created.
    pub async fn run<S: SampleSource>(
        &self,
        run_id: RunId,
        source: &S,
    ) -> Result<RunReport, PipelineError> {
        let key = self.settings.series_key.as_str();

        enter(Stage::LoadSource);
        let samples = source
            .load()
            .map_err(|e| fail(Stage::LoadSource, e.into()))?;
        info!(samples = samples.len(), "Source loaded");

        enter(Stage::WriteCache);
        if self.settings.clear_stale_series {
            let removed = self
                .cache
                .delete(key)
                .await
                .map_err(|e| fail(Stage::WriteCache, PipelineErrorKind::CacheOperation(e)))?;
            if removed {
                warn!(key, "Removed stale series left by an earlier run");
            }
        }
        self.cache
            .create_series(key, self.settings.retention_ms)
            .await
            .map_err(|e| fail(Stage::WriteCache, PipelineErrorKind::CacheOperation(e)))?;
        info!(key, retention_ms = self.settings.retention_ms, "Series created");

        let outcome = self.transfer(&samples).await;

        enter(Stage::EvictCache);
        let eviction = self.cache.delete(key).await;

        match (outcome, eviction) {
            (Ok(transfer), Ok(evicted)) => {
                info!(key, evicted, "Series evicted");
                info!(stage = %Stage::Done, rows = transfer.persisted, "Migration complete");
                Ok(RunReport {
                    run_id,
                    samples_loaded: samples.len(),
                    samples_cached: transfer.cached,
                    samples_read: transfer.read,
                    rows_persisted: transfer.persisted,
                    evicted,
                })
            }
            (Ok(_), Err(e)) => Err(fail(
                Stage::EvictCache,
                PipelineErrorKind::CacheOperation(e),
            )),
            (Err(stage_error), Ok(evicted)) => {
                info!(key, evicted, "Series evicted after failure");
                Err(stage_error)
            }
            (Err(stage_error), Err(e)) => {
                error!(key, error = %e, "Eviction after failure also failed; key may be stranded");
                Err(stage_error)
            }
        }
    }

    async fn transfer(&self, samples: &[Sample]) -> Result<Transfer, PipelineError> {
        let key = self.settings.series_key.as_str();

        let cached = self
            .cache
            .append_all(key, samples)
            .await
            .map_err(|e| fail(Stage::WriteCache, PipelineErrorKind::CacheOperation(e)))?;
        info!(key, cached, "Samples cached");

        enter(Stage::ReadCache);
        let read = self
            .cache
            .read_range(key, RangeBound::Earliest, RangeBound::Latest)
            .await
            .map_err(|e| fail(Stage::ReadCache, PipelineErrorKind::CacheOperation(e)))?;
        let expected = expected_retained(samples, self.settings.retention_ms);
        if read.len() != expected {
            return Err(fail(
                Stage::ReadCache,
                PipelineErrorKind::IncompleteRead {
                    expected,
                    read: read.len(),
                },
            ));
        }
        if expected < samples.len() {
            warn!(
                dropped = samples.len().saturating_sub(expected),
                retention_ms = self.settings.retention_ms,
                "Retention window dropped samples before read"
            );
        }
        info!(key, read = read.len(), "Samples read back");

        enter(Stage::EnsureSchema);
        self.sink
            .ensure_schema()
            .await
            .map_err(|e| fail(Stage::EnsureSchema, PipelineErrorKind::Persistence(e)))?;

        enter(Stage::CommitPersistence);
        let persisted = self
            .sink
            .bulk_insert(&read)
            .await
            .map_err(|e| fail(Stage::CommitPersistence, PipelineErrorKind::Persistence(e)))?;

        Ok(Transfer {
            cached,
            read: read.len(),
            persisted,
        })
    }
}

/// Connects the cache and sink a run needs, and releases them afterwards.
pub trait Backends {
    /// The staging cache.
    type Cache: SeriesCache;
    /// The destination sink.
    type Sink: SampleSink;

    /// Open both connections.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<(Self::Cache, Self::Sink), PipelineError>> + Send;

    /// Close both connections.
    fn close(&self, cache: Self::Cache, sink: Self::Sink) -> impl Future<Output = ()> + Send;
}

/// Redis and `PostgreSQL` backends built from [`MigrationConfig`].
pub struct LiveBackends<S> {
    postgres: PostgresConfig,
    redis_url: String,
    table: String,
    batch_size: usize,
    policy: RetryPolicy,
    sleeper: S,
}

impl<S: Sleeper> LiveBackends<S> {
    /// Build backends from `config`, sleeping between bootstrap attempts
    /// with `sleeper`.
    pub fn new(config: &MigrationConfig, sleeper: S) -> Self {
        Self {
            postgres: config.postgres.connection_config(),
            redis_url: config.cache.url(),
            table: config.postgres.table.clone(),
            batch_size: config.postgres.batch_size,
            policy: config.bootstrap.retry_policy(),
            sleeper,
        }
    }
}

impl<S: Sleeper + Sync> Backends for LiveBackends<S> {
    type Cache = RedisSeriesCache;
    type Sink = SampleStore;

    async fn connect(&self) -> Result<(RedisSeriesCache, SampleStore), PipelineError> {
        let pool = PostgresPool::bootstrap(&self.postgres, &self.policy, &self.sleeper)
            .await
            .map_err(|e| fail(Stage::BootstrapConnections, PipelineErrorKind::Connection(e)))?;

        let sink = match SampleStore::new(pool.pool().clone(), &self.table) {
            Ok(store) => store.with_batch_size(self.batch_size),
            Err(e) => {
                pool.close().await;
                return Err(fail(
                    Stage::BootstrapConnections,
                    PipelineErrorKind::Persistence(e),
                ));
            }
        };

        match RedisSeriesCache::connect(&self.redis_url).await {
            Ok(cache) => Ok((cache, sink)),
            Err(e) => {
                pool.close().await;
                Err(fail(
                    Stage::BootstrapConnections,
                    PipelineErrorKind::Connection(e),
                ))
            }
        }
    }

    async fn close(&self, cache: RedisSeriesCache, sink: SampleStore) {
        if let Err(e) = cache.quit().await {
            warn!(error = %e, "Failed to close Redis connection");
        }
        PostgresPool::from_pool(sink.pool().clone()).close().await;
    }
}

/// Run one migration inside a `run` span carrying a fresh [`RunId`].
///
/// # Errors
///
/// Returns [`PipelineError`] if connecting or any stage fails.
pub async fn migrate<B, S>(
    backends: &B,
    source: &S,
    settings: &PipelineSettings,
) -> Result<RunReport, PipelineError>
where
    B: Backends,
    S: SampleSource,
{
    let run_id = RunId::new();
    let span = tracing::info_span!("run", run_id = %run_id);

    async move {
        info!(
            stage = %Stage::Init,
            series_key = settings.series_key,
            retention_ms = settings.retention_ms,
            "Migration starting"
        );

        enter(Stage::BootstrapConnections);
        let (cache, sink) = backends.connect().await?;

        let result = Pipeline::new(&cache, &sink, settings)
            .run(run_id, source)
            .await;
        if let Err(e) = &result {
            error!(stage = %Stage::Failed, failed_at = %e.stage, error = %e.kind, "Migration failed");
        }

        backends.close(cache, sink).await;
        result
    }
    .instrument(span)
    .await
}
