//! Configuration, recording loader and pipeline driver for the Brainwaves
//! migration.
//!
//! The migration runs once per process: load one channel of a recording,
//! stage it in a `RedisTimeSeries` series, read it back, persist it to a
//! `TimescaleDB` hypertable, and evict the series.
//!
//! # Modules
//!
//! - [`config`] -- Typed configuration loaded from YAML and the environment
//! - [`source`] -- Recording loader (CSV and JSON exports)
//! - [`pipeline`] -- Stage state machine and the migration driver

pub mod config;
pub mod pipeline;
pub mod source;

pub use config::{ConfigError, MigrationConfig};
pub use pipeline::{
    Backends, LiveBackends, Pipeline, PipelineError, PipelineErrorKind, PipelineSettings,
    RunReport, Stage, migrate,
};
pub use source::{ChannelSelector, Recording, RecordingSource, SampleSource, SourceError};
