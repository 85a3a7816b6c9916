//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors with additional context about which
//! operation failed.

use brainwaves_types::InvalidTimestamp;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A Redis / `RedisTimeSeries` command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// The cache replied with a shape the client does not understand.
    #[error("Unexpected reply to {command}: {detail}")]
    UnexpectedReply {
        /// The command whose reply could not be decoded.
        command: &'static str,
        /// What was wrong with the reply.
        detail: String,
    },

    /// A cache command was rejected by the in-memory cache.
    #[error("Cache rejected {command} on {key}: {reason}")]
    Rejected {
        /// The logical command that was rejected.
        command: &'static str,
        /// The series key involved.
        key: String,
        /// Why the command was rejected.
        reason: String,
    },

    /// A record cannot be written to the hypertable.
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] InvalidTimestamp),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
