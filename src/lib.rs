/// Wind turbine telemetry ingestion
///
/// Reads per-group CSV batches of turbine readings, validates and cleans
/// them, aggregates daily statistics, flags days whose output departs from
/// the turbine's recent history, and persists all of it to Postgres.

pub mod analysis;
pub mod config;
pub mod error;
pub mod groups;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod pipeline;

pub use error::{IngestError, Result};
