/// Storage seam for the ingestion pipeline.
///
/// The pipeline only talks to the two traits below. Postgres transactions
/// implement both (see `crud`), as does the in-memory `MemoryStore` used by
/// tests and dry runs.
///
/// Submodules:
/// - `db`: connection and schema bootstrap.
/// - `crud`: SQL behind the traits for `postgres::Transaction`.
/// - `memory`: `MemoryStore`, a map-backed stand-in with the same
///   conflict semantics.

pub mod crud;
pub mod db;
pub mod memory;

use crate::error::Result;
use crate::model::{DailyAnomaly, DailySummary, DailyValue, HistoryMetric, Reading, WriteMode};
use chrono::{Days, NaiveDate};

pub use memory::MemoryStore;

/// Receives the three record streams of a run.
///
/// Each call returns the number of rows actually inserted or overwritten;
/// rows skipped on a key conflict are not counted.
pub trait RecordSink {
    fn write_readings(&mut self, readings: &[Reading], mode: WriteMode) -> Result<usize>;

    fn write_daily_summaries(
        &mut self,
        summaries: &[DailySummary],
        mode: WriteMode,
    ) -> Result<usize>;

    fn write_daily_anomalies(
        &mut self,
        anomalies: &[DailyAnomaly],
        mode: WriteMode,
    ) -> Result<usize>;
}

/// Supplies per-turbine, per-day historical aggregates.
pub trait HistorySource {
    /// Rows dated strictly before `before_date` and, when `window_days` is
    /// set, on or after `before_date - window_days`.
    fn load_daily_values(
        &mut self,
        metric: HistoryMetric,
        before_date: NaiveDate,
        window_days: Option<u32>,
    ) -> Result<Vec<DailyValue>>;
}

/// Inclusive lower bound of a history window, or `None` for all history.
///
/// A window reaching past the earliest representable date is unbounded.
pub fn window_start(before_date: NaiveDate, window_days: Option<u32>) -> Option<NaiveDate> {
    window_days.and_then(|days| before_date.checked_sub_days(Days::new(u64::from(days))))
}

/// Whether `date` falls inside the history window ending before `before_date`.
pub fn in_window(date: NaiveDate, before_date: NaiveDate, window_days: Option<u32>) -> bool {
    date < before_date && window_start(before_date, window_days).is_none_or(|start| date >= start)
}
