//! Shared type definitions for the Brainwaves migration pipeline.
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//! a recording channel becomes a sequence of [`Sample`]s, travels through the
//! time-series cache, and lands in `PostgreSQL` as [`PersistedRow`]s.
//!
//! # Modules
//!
//! - [`ids`] -- Run identifier used to correlate log lines
//! - [`sample`] -- Samples, persisted rows, and cache range bounds

pub mod ids;
pub mod sample;

// Re-export all public types at crate root for convenience.
pub use ids::RunId;
pub use sample::{InvalidTimestamp, PersistedRow, RangeBound, Sample, expected_retained};
