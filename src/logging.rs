/// Structured logging for the turbine ingestion service
///
/// Thin layer over `tracing`: installs the subscriber (console plus an
/// optional append-mode log file) and provides the stage tags and summary
/// helpers the pipeline uses so every log line carries the same context.

use crate::error::IngestError;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

/// Which part of the pipeline a log line comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Validate,
    Clean,
    Aggregate,
    Baseline,
    Anomaly,
    Persist,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Read => write!(f, "READ"),
            Stage::Validate => write!(f, "VALIDATE"),
            Stage::Clean => write!(f, "CLEAN"),
            Stage::Aggregate => write!(f, "AGG"),
            Stage::Baseline => write!(f, "BASELINE"),
            Stage::Anomaly => write!(f, "ANOMALY"),
            Stage::Persist => write!(f, "DB"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// The batch itself was rejected (schema, types, turbine range, group name).
    Expected,
    /// The environment is broken (I/O, database, configuration).
    Unexpected,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
        }
    }
}

pub fn classify_failure(err: &IngestError) -> FailureType {
    if err.is_data_rejection() {
        FailureType::Expected
    } else {
        FailureType::Unexpected
    }
}

// ---------------------------------------------------------------------------
// Subscriber Setup
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `min_level` when set. With a
/// `log_file`, lines go to stderr and are appended to the file without ANSI
/// colours. `timestamps` applies to both outputs. Calling this more than
/// once (e.g. from several tests) is harmless: later calls are ignored.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&Path>,
    timestamps: bool,
) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::from(min_level).into()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let file = match log_file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };

    let result = match (file, timestamps) {
        (Some(file), true) => builder
            .with_writer(std::io::stderr.and(Mutex::new(file)))
            .with_ansi(false)
            .try_init(),
        (Some(file), false) => builder
            .without_time()
            .with_writer(std::io::stderr.and(Mutex::new(file)))
            .with_ansi(false)
            .try_init(),
        (None, true) => builder.with_writer(std::io::stderr).try_init(),
        (None, false) => builder
            .without_time()
            .with_writer(std::io::stderr)
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("logger already initialised");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Stage Summary Logging
// ---------------------------------------------------------------------------

/// Logs how many rows a stage consumed and produced.
///
/// A stage that removed every row is escalated to a warning: an empty
/// batch reaching the database is almost always a data problem upstream.
pub fn log_stage_summary(stage: Stage, rows_before: usize, rows_after: usize) {
    let removed = rows_before.saturating_sub(rows_after);
    if rows_before > 0 && rows_after == 0 {
        tracing::warn!(%stage, rows_before, rows_after, "stage removed every row");
    } else {
        tracing::info!(%stage, rows_before, rows_after, removed, "stage complete");
    }
}

/// Logs a failed batch with automatic classification.
pub fn log_batch_failure(batch: &str, err: &IngestError) -> FailureType {
    let failure_type = classify_failure(err);
    match failure_type {
        FailureType::Expected => {
            tracing::warn!(batch, failure = %failure_type, "skipping batch: {err}")
        }
        FailureType::Unexpected => {
            tracing::error!(batch, failure = %failure_type, "batch failed: {err}")
        }
    }
    failure_type
}

/// Logs a summary of a multi-file run.
pub fn log_run_summary(total: usize, successful: usize, skipped: usize) {
    let message = format!(
        "Run complete: {}/{} processed, {} skipped",
        successful, total, skipped
    );

    if skipped == 0 {
        tracing::info!(stage = %Stage::System, "{message}");
    } else if successful == 0 {
        tracing::error!(stage = %Stage::System, "{message}");
    } else {
        tracing::warn!(stage = %Stage::System, "{message}");
    }
}
