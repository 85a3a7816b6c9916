//! `RedisTimeSeries` staging cache.
//!
//! Samples pass through a single retention-bounded series on their way to
//! `PostgreSQL`. The [`SeriesCache`] trait captures the four operations the
//! pipeline needs; [`RedisSeriesCache`] implements them against a live
//! server using `fred` custom commands.
//!
//! # Commands
//!
//! | Operation | Command |
//! |-----------|---------|
//! | create | `TS.CREATE {key} RETENTION {ms}` |
//! | append | `TS.ADD {key} {ts} {value}` |
//! | read | `EXISTS {key}` then `TS.RANGE {key} {from} {to}` |
//! | evict | `DEL {key}` |

use std::future::Future;

use brainwaves_types::{RangeBound, Sample};
use fred::prelude::*;
use fred::types::{ClusterHash, CustomCommand, Value};

use crate::error::DbError;

/// Number of `TS.ADD` commands sent per pipeline round-trip.
const APPEND_CHUNK: usize = 1000;

/// Operations on a retention-bounded time series.
pub trait SeriesCache {
    /// Create `key` with the given retention window (`0` keeps everything).
    ///
    /// Fails if the key already exists.
    fn create_series(
        &self,
        key: &str,
        retention_ms: u64,
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Append one sample to `key`.
    fn append(&self, key: &str, sample: Sample)
    -> impl Future<Output = Result<(), DbError>> + Send;

    /// Append `samples` to `key` in order, returning how many were written.
    fn append_all(
        &self,
        key: &str,
        samples: &[Sample],
    ) -> impl Future<Output = Result<usize, DbError>> + Send;

    /// Read the inclusive range `[from, to]` in ascending timestamp order.
    ///
    /// A missing key reads as an empty series.
    fn read_range(
        &self,
        key: &str,
        from: RangeBound,
        to: RangeBound,
    ) -> impl Future<Output = Result<Vec<Sample>, DbError>> + Send;

    /// Delete `key`, returning whether it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, DbError>> + Send;
}

/// Connection handle to a Redis server with the `RedisTimeSeries` module.
#[derive(Clone)]
pub struct RedisSeriesCache {
    client: Client,
}

impl RedisSeriesCache {
    /// Connect to Redis at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Redis`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Redis URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Redis");
        Ok(Self { client })
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the shutdown command fails.
    pub async fn quit(&self) -> Result<(), DbError> {
        self.client.quit().await?;
        tracing::info!("Redis connection closed");
        Ok(())
    }
}

fn ts_command(name: &'static str) -> CustomCommand {
    CustomCommand::new_static(name, ClusterHash::FirstKey, false)
}

fn add_args(key: &str, sample: Sample) -> Vec<Value> {
    vec![
        Value::from(key),
        Value::Integer(sample.timestamp_ms),
        Value::Double(sample.value),
    ]
}

/// Decode a `TS.RANGE` reply: an array of `[timestamp, value]` pairs.
///
/// Values arrive as strings under RESP2 and as doubles under RESP3.
fn decode_range(reply: Value) -> Result<Vec<Sample>, DbError> {
    let bad = |detail: String| DbError::UnexpectedReply {
        command: "TS.RANGE",
        detail,
    };

    let entries = match reply {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => return Err(bad(format!("expected array, got {:?}", other.kind()))),
    };

    let mut samples = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Array(pair) = entry else {
            return Err(bad("expected [timestamp, value] pair".to_owned()));
        };
        let [ts, value] = pair.as_slice() else {
            return Err(bad(format!("expected 2 elements, got {}", pair.len())));
        };
        let timestamp_ms = ts
            .as_i64()
            .ok_or_else(|| bad(format!("non-integer timestamp {ts:?}")))?;
        let value = value
            .as_f64()
            .ok_or_else(|| bad(format!("non-numeric value {value:?}")))?;
        samples.push(Sample::new(timestamp_ms, value));
    }
    Ok(samples)
}

impl SeriesCache for RedisSeriesCache {
    async fn create_series(&self, key: &str, retention_ms: u64) -> Result<(), DbError> {
        let retention = i64::try_from(retention_ms)
            .map_err(|e| DbError::Config(format!("retention {retention_ms}ms too large: {e}")))?;
        let args = vec![
            Value::from(key),
            Value::from("RETENTION"),
            Value::Integer(retention),
        ];
        let _: Value = self.client.custom(ts_command("TS.CREATE"), args).await?;
        tracing::debug!(key, retention_ms, "Created time series");
        Ok(())
    }

    async fn append(&self, key: &str, sample: Sample) -> Result<(), DbError> {
        let _: Value = self
            .client
            .custom(ts_command("TS.ADD"), add_args(key, sample))
            .await?;
        Ok(())
    }

    async fn append_all(&self, key: &str, samples: &[Sample]) -> Result<usize, DbError> {
        for chunk in samples.chunks(APPEND_CHUNK) {
            let pipeline = self.client.pipeline();
            for sample in chunk {
                let _: () = pipeline
                    .custom(ts_command("TS.ADD"), add_args(key, *sample))
                    .await?;
            }
            let _: Vec<Value> = pipeline.all().await?;
        }
        tracing::debug!(key, count = samples.len(), "Appended samples (pipelined TS.ADD)");
        Ok(samples.len())
    }

    async fn read_range(
        &self,
        key: &str,
        from: RangeBound,
        to: RangeBound,
    ) -> Result<Vec<Sample>, DbError> {
        let exists: i64 = self.client.exists(key).await?;
        if exists == 0 {
            return Ok(Vec::new());
        }
        let args = vec![
            Value::from(key),
            Value::from(from.to_string()),
            Value::from(to.to_string()),
        ];
        let reply: Value = self.client.custom(ts_command("TS.RANGE"), args).await?;
        decode_range(reply)
    }

    async fn delete(&self, key: &str) -> Result<bool, DbError> {
        let removed: i64 = self.client.del(key).await?;
        Ok(removed > 0)
    }
}
