//! Hypertable writer for migrated samples.
//!
//! Samples become rows of a `TimescaleDB` hypertable with two columns,
//! `time TIMESTAMPTZ` and `value DOUBLE PRECISION`. The schema is created on
//! demand and every statement involved is idempotent, so
//! [`SampleSink::ensure_schema`] runs on every invocation of the pipeline.

use std::future::Future;

use brainwaves_types::{PersistedRow, Sample};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::DbError;

/// Default destination table.
pub const DEFAULT_TABLE: &str = "eeg_data";

/// Default number of rows per `UNNEST` statement.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Longest identifier `PostgreSQL` accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Destination for samples read back out of the cache.
pub trait SampleSink {
    /// Create the table, extension and hypertable if they are absent.
    fn ensure_schema(&self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Insert all `samples` atomically, returning the number of rows written.
    ///
    /// Either every row becomes visible or none does.
    fn bulk_insert(
        &self,
        samples: &[Sample],
    ) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Number of rows currently in the table.
    fn count_rows(&self) -> impl Future<Output = Result<u64, DbError>> + Send;
}

/// Check that `name` can be spliced into DDL as a bare identifier.
///
/// # Errors
///
/// Returns [`DbError::Config`] unless `name` matches
/// `[A-Za-z_][A-Za-z0-9_]*` and fits in 63 bytes.
pub fn validate_table_name(name: &str) -> Result<(), DbError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if head_ok && tail_ok && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(DbError::Config(format!("invalid table name: {name:?}")))
    }
}

/// Operations on the sample hypertable.
///
/// Holds a clone of the pool handle; clones share the same connections.
#[derive(Clone)]
pub struct SampleStore {
    pool: PgPool,
    table: String,
    batch_size: usize,
}

impl SampleStore {
    /// Create a store bound to a connection pool, writing to `table`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if `table` is not a plain identifier.
    pub fn new(pool: PgPool, table: &str) -> Result<Self, DbError> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Set the number of rows per insert statement.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// The destination table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SampleSink for SampleStore {
    async fn ensure_schema(&self) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                time TIMESTAMPTZ NOT NULL,
                value DOUBLE PRECISION NOT NULL
            )",
            self.table
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS timescaledb CASCADE")
            .execute(&mut *tx)
            .await?;

        sqlx::query("SELECT create_hypertable($1::TEXT::REGCLASS, 'time', if_not_exists => TRUE)")
            .bind(&self.table)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(table = self.table, "Schema ensured (table, extension, hypertable)");
        Ok(())
    }

    /// Rows are converted before the transaction opens, so a malformed
    /// sample aborts the batch without touching the database. Inside the
    /// transaction rows go out as multi-row `UNNEST` inserts of
    /// `batch_size` rows each.
    async fn bulk_insert(&self, samples: &[Sample]) -> Result<u64, DbError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let rows = samples
            .iter()
            .map(PersistedRow::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let statement = format!(
            "INSERT INTO {} (time, value)
             SELECT * FROM UNNEST($1::TIMESTAMPTZ[], $2::DOUBLE PRECISION[])",
            self.table
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;

        for chunk in rows.chunks(self.batch_size) {
            let len = chunk.len();
            let mut times: Vec<DateTime<Utc>> = Vec::with_capacity(len);
            let mut values: Vec<f64> = Vec::with_capacity(len);
            for row in chunk {
                times.push(row.time);
                values.push(row.value);
            }

            let result = sqlx::query(&statement)
                .bind(&times)
                .bind(&values)
                .execute(&mut *tx)
                .await?;
            inserted = inserted.saturating_add(result.rows_affected());
        }

        tx.commit().await?;

        tracing::info!(table = self.table, rows = inserted, "Inserted samples (batch UNNEST)");
        Ok(inserted)
    }

    async fn count_rows(&self) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_table_name("eeg_data").is_ok());
        assert!(validate_table_name("_scratch2").is_ok());
        assert!(validate_table_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_anything_that_needs_quoting() {
        for bad in ["", "2fast", "eeg-data", "eeg data", "eeg_data; DROP TABLE x", "\"q\""] {
            assert!(
                matches!(validate_table_name(bad), Err(DbError::Config(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_table_name(&"a".repeat(64)).is_err());
    }
}
