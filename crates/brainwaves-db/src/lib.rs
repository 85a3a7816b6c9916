//! Data layer for the Brainwaves migration pipeline (`RedisTimeSeries` +
//! `PostgreSQL`).
//!
//! `RedisTimeSeries` is the short-lived staging area: a recording channel is
//! written into a retention-bounded series, read back, and deleted once the
//! samples are durable. `PostgreSQL` with the `TimescaleDB` extension is the
//! destination: samples become rows of a time-partitioned hypertable.
//!
//! # Architecture
//!
//! ```text
//! Recording samples
//!     |
//!     +-- TS.CREATE / TS.ADD ----> RedisTimeSeries (RedisSeriesCache)
//!     +-- TS.RANGE - + ---------> samples back out
//!     |
//!     +-- ensure_schema + UNNEST -> PostgreSQL hypertable (SampleStore)
//!     |
//!     +-- DEL ------------------> RedisTimeSeries
//! ```
//!
//! # Modules
//!
//! - [`retry`] -- Retry policy, backoff and the sleeper seam used at bootstrap
//! - [`postgres`] -- `PostgreSQL` connection pool, configuration and bootstrap
//! - [`series_cache`] -- [`SeriesCache`] trait and the `RedisTimeSeries` client
//! - [`sample_store`] -- [`SampleSink`] trait and the hypertable writer
//! - [`memory`] -- In-memory cache and sink with the same semantics, for tests
//! - [`error`] -- Shared error types

pub mod error;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod sample_store;
pub mod series_cache;

// Re-export primary types for convenience.
pub use error::DbError;
pub use memory::{MemorySampleStore, MemorySeriesCache};
pub use postgres::{PostgresConfig, PostgresPool};
pub use retry::{Backoff, RetryPolicy, Sleeper, TokioSleeper, retry};
pub use sample_store::{SampleSink, SampleStore, validate_table_name};
pub use series_cache::{RedisSeriesCache, SeriesCache};
