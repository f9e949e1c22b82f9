/// Error types for the ingestion pipeline.
///
/// Validation failures (`Schema`, `Type`, `Range`) abort the whole batch.
/// Insufficient history is *not* an error: it travels with the anomaly
/// check as `analysis::anomaly::HistoryGap`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// One or more required columns are absent from the raw batch.
    #[error("Missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    /// A cell could not be coerced to its column's declared type.
    #[error("Type coercion failed at row {row}, column '{column}': {value:?} is not a valid {expected}")]
    Type {
        row: usize,
        column: String,
        value: String,
        expected: &'static str,
    },

    /// Turbine IDs outside the group's configured range.
    #[error("Turbine IDs outside expected range [{min_id}, {max_id}] in {group}: {offending:?}")]
    Range {
        group: String,
        min_id: i64,
        max_id: i64,
        offending: Vec<i64>,
    },

    #[error("Invalid group name format: {0}")]
    InvalidGroupName(String),

    #[error("No turbine range configured for group {0}")]
    UnknownGroup(u32),

    #[error("Failed to read {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("File is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File is corrupted or badly formatted: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] postgres::Error),

    #[error("DATABASE_URL is not set and no [database] url is configured")]
    MissingDatabaseUrl,
}

impl IngestError {
    /// True for errors that reject the batch's content rather than signal
    /// a broken environment. A CSV error caused by the underlying reader
    /// failing is an environment problem, not malformed content.
    pub fn is_data_rejection(&self) -> bool {
        match self {
            IngestError::Csv(e) => !matches!(e.kind(), csv::ErrorKind::Io(_)),
            IngestError::Schema { .. }
            | IngestError::Type { .. }
            | IngestError::Range { .. }
            | IngestError::InvalidGroupName(_)
            | IngestError::UnknownGroup(_)
            | IngestError::EmptyFile(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
