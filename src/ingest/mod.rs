/// Batch ingestion: raw CSV reading, validation, and cleaning.
///
/// Submodules:
/// - `reader`: loads a CSV file into uninterpreted string cells.
/// - `validation`: schema, type, and turbine-range checks.
/// - `cleaning`: deduplication, bounded forward-fill, physical limits,
///   statistical outliers.

pub mod cleaning;
pub mod reader;
pub mod validation;

use crate::error::Result;
use crate::groups::TurbineGroups;
use crate::logging::{Stage, log_stage_summary};
use crate::model::ReadingRow;
use chrono::NaiveDate;
use std::path::Path;
use validation::ValidatedBatch;

/// Reads a CSV file and runs every validation check on it.
pub fn read_and_validate_csv(
    path: &Path,
    group_name: &str,
    groups: &TurbineGroups,
) -> Result<ValidatedBatch> {
    let raw = reader::read_csv_file(path)?;
    tracing::info!(
        stage = %Stage::Read,
        path = %path.display(),
        group = group_name,
        "validating batch"
    );
    validation::validate_batch(&raw, group_name, groups)
}

/// Keeps rows whose timestamp falls on `date`.
///
/// Rows without a timestamp cannot be placed on any day and are dropped.
pub fn filter_target_date(rows: Vec<ReadingRow>, date: NaiveDate) -> Vec<ReadingRow> {
    let before = rows.len();
    let kept: Vec<ReadingRow> = rows
        .into_iter()
        .filter(|r| r.timestamp.is_some_and(|ts| ts.date() == date))
        .collect();
    tracing::info!(stage = %Stage::Validate, %date, "filtered batch to target date");
    log_stage_summary(Stage::Validate, before, kept.len());
    kept
}
