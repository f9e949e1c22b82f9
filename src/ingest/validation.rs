/// Batch validation.
///
/// Checks run in a fixed order and the first failure rejects the whole
/// batch; nothing is partially validated:
///
/// 1. required columns present (`Schema`)
/// 2. every cell coercible to its column type (`Type`)
/// 3. every turbine ID inside the group's range (`Range`)
/// 4. expected turbines absent from the batch: warning only

use crate::error::{IngestError, Result};
use crate::groups::{TurbineGroup, TurbineGroups};
use crate::ingest::reader::RawBatch;
use crate::model::{
    COL_POWER_OUTPUT, COL_TIMESTAMP, COL_TURBINE_ID, COL_WIND_DIRECTION, COL_WIND_SPEED,
    REQUIRED_COLUMNS, ReadingRow,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;

/// Cell contents read as "no value".
pub const NULL_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A type-coerced batch whose turbine IDs all belong to `group`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBatch {
    pub group_name: String,
    pub group: TurbineGroup,
    pub rows: Vec<ReadingRow>,
    /// Turbines of the group that never appear in the batch.
    pub missing_turbines: BTreeSet<i64>,
}

// ---------------------------------------------------------------------------
// Cell coercion
// ---------------------------------------------------------------------------

fn is_null(cell: &str) -> bool {
    NULL_TOKENS.contains(&cell.trim())
}

/// Parses a time-zone naive timestamp.
///
/// Offset-carrying RFC 3339 values are converted to UTC first; a bare date
/// is read as midnight.
pub fn parse_timestamp(cell: &str) -> Option<NaiveDateTime> {
    let cell = cell.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(cell, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(cell).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(cell, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parses an integer, accepting integral floats such as `"3.0"`.
pub fn parse_integer(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    cell.parse::<i64>().ok().or_else(|| {
        let value = cell.parse::<f64>().ok()?;
        (value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64)
            .then_some(value as i64)
    })
}

struct ColumnIndices {
    timestamp: usize,
    turbine_id: usize,
    wind_speed: usize,
    wind_direction: usize,
    power_output: usize,
}

fn type_error(row: usize, column: &str, value: &str, expected: &'static str) -> IngestError {
    IngestError::Type {
        row,
        column: column.to_string(),
        value: value.to_string(),
        expected,
    }
}

fn coerce_row(cells: &[String], idx: &ColumnIndices, row: usize) -> Result<ReadingRow> {
    let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");

    let float = |i: usize, column: &str| -> Result<Option<f64>> {
        let raw = cell(i);
        if is_null(raw) {
            return Ok(None);
        }
        raw.trim()
            .parse::<f64>()
            .map(|v| if v.is_nan() { None } else { Some(v) })
            .map_err(|_| type_error(row, column, raw, "float"))
    };

    let timestamp = match cell(idx.timestamp) {
        raw if is_null(raw) => None,
        raw => Some(
            parse_timestamp(raw).ok_or_else(|| type_error(row, COL_TIMESTAMP, raw, "datetime"))?,
        ),
    };

    let turbine_id = match cell(idx.turbine_id) {
        raw if is_null(raw) => None,
        raw => Some(parse_integer(raw).ok_or_else(|| type_error(row, COL_TURBINE_ID, raw, "integer"))?),
    };

    Ok(ReadingRow {
        timestamp,
        turbine_id,
        wind_speed: float(idx.wind_speed, COL_WIND_SPEED)?,
        wind_direction: float(idx.wind_direction, COL_WIND_DIRECTION)?,
        power_output: float(idx.power_output, COL_POWER_OUTPUT)?,
    })
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Step 1 + 2: schema and type coercion.
pub fn validate_dataframe(batch: &RawBatch) -> Result<Vec<ReadingRow>> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| batch.column_index(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        tracing::error!(?missing, "missing required columns");
        return Err(IngestError::Schema { missing });
    }

    // Presence was checked above, so every lookup succeeds.
    let index = |name: &str| batch.column_index(name).unwrap_or_default();
    let idx = ColumnIndices {
        timestamp: index(COL_TIMESTAMP),
        turbine_id: index(COL_TURBINE_ID),
        wind_speed: index(COL_WIND_SPEED),
        wind_direction: index(COL_WIND_DIRECTION),
        power_output: index(COL_POWER_OUTPUT),
    };

    batch
        .rows
        .iter()
        .enumerate()
        .map(|(i, cells)| coerce_row(cells, &idx, i + 1))
        .collect::<Result<Vec<_>>>()
        .inspect_err(|e| tracing::error!("data type coercion failed: {e}"))
}

/// Step 3 + 4: turbine IDs against the group range.
///
/// Returns the expected turbines that are absent; their absence is logged
/// but does not fail the batch.
pub fn validate_turbine_ids(
    rows: &[ReadingRow],
    group_name: &str,
    group: &TurbineGroup,
) -> Result<BTreeSet<i64>> {
    let present: BTreeSet<i64> = rows.iter().filter_map(|r| r.turbine_id).collect();

    let offending: Vec<i64> = present.iter().copied().filter(|id| !group.contains(*id)).collect();
    if !offending.is_empty() {
        tracing::error!(group = group_name, ?offending, "turbine IDs outside expected range");
        return Err(IngestError::Range {
            group: group_name.to_string(),
            min_id: group.min_id,
            max_id: group.max_id,
            offending,
        });
    }

    let missing: BTreeSet<i64> = group.expected_ids().filter(|id| !present.contains(id)).collect();
    if !missing.is_empty() {
        tracing::warn!(group = group_name, ?missing, "expected turbines missing from batch");
    }
    Ok(missing)
}

/// Runs every check in order and returns the coerced batch.
pub fn validate_batch(
    batch: &RawBatch,
    group_name: &str,
    groups: &TurbineGroups,
) -> Result<ValidatedBatch> {
    let rows = validate_dataframe(batch)?;
    let group = groups.range_for(group_name)?;
    let missing_turbines = validate_turbine_ids(&rows, group_name, &group)?;

    tracing::info!(group = group_name, rows = rows.len(), "batch validated");
    Ok(ValidatedBatch {
        group_name: group_name.to_string(),
        group,
        rows,
        missing_turbines,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
