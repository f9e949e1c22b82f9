/// Core data types for the wind turbine ingestion service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O and no pipeline logic: only types and the small
/// accessors needed to treat the three sensor channels uniformly.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_TURBINE_ID: &str = "turbine_id";
pub const COL_WIND_SPEED: &str = "wind_speed";
pub const COL_WIND_DIRECTION: &str = "wind_direction";
pub const COL_POWER_OUTPUT: &str = "power_output";

/// Every column a raw batch must carry, in canonical order.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    COL_TIMESTAMP,
    COL_TURBINE_ID,
    COL_WIND_SPEED,
    COL_WIND_DIRECTION,
    COL_POWER_OUTPUT,
];

// ---------------------------------------------------------------------------
// Sensor channels
// ---------------------------------------------------------------------------

/// One of the three measured channels on a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorField {
    WindSpeed,
    WindDirection,
    PowerOutput,
}

impl SensorField {
    pub const ALL: [SensorField; 3] = [
        SensorField::WindSpeed,
        SensorField::WindDirection,
        SensorField::PowerOutput,
    ];

    /// CSV / database column name of this channel.
    pub fn column(self) -> &'static str {
        match self {
            SensorField::WindSpeed => COL_WIND_SPEED,
            SensorField::WindDirection => COL_WIND_DIRECTION,
            SensorField::PowerOutput => COL_POWER_OUTPUT,
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// A type-coerced row that has passed validation but not cleaning.
///
/// Any field may still be missing: the cleaner is responsible for dropping
/// rows without a key and repairing or dropping rows with missing sensor
/// values. `turbine_id`, when present, is known to be inside the batch's
/// group range.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadingRow {
    pub timestamp: Option<NaiveDateTime>,
    pub turbine_id: Option<i64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub power_output: Option<f64>,
}

impl ReadingRow {
    pub fn sensor(&self, field: SensorField) -> Option<f64> {
        match field {
            SensorField::WindSpeed => self.wind_speed,
            SensorField::WindDirection => self.wind_direction,
            SensorField::PowerOutput => self.power_output,
        }
    }

    pub fn set_sensor(&mut self, field: SensorField, value: Option<f64>) {
        match field {
            SensorField::WindSpeed => self.wind_speed = value,
            SensorField::WindDirection => self.wind_direction = value,
            SensorField::PowerOutput => self.power_output = value,
        }
    }

    /// Converts to a complete [`Reading`] if no field is missing.
    pub fn complete(&self) -> Option<Reading> {
        Some(Reading {
            timestamp: self.timestamp?,
            turbine_id: self.turbine_id?,
            wind_speed: self.wind_speed?,
            wind_direction: self.wind_direction?,
            power_output: self.power_output?,
        })
    }
}

/// A complete sensor sample from one turbine.
///
/// Uniquely identified by `(timestamp, turbine_id)`; timestamps are
/// time-zone naive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub turbine_id: i64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub power_output: f64,
}

impl Reading {
    pub fn sensor(&self, field: SensorField) -> f64 {
        match field {
            SensorField::WindSpeed => self.wind_speed,
            SensorField::WindDirection => self.wind_direction,
            SensorField::PowerOutput => self.power_output,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

impl From<Reading> for ReadingRow {
    fn from(r: Reading) -> Self {
        ReadingRow {
            timestamp: Some(r.timestamp),
            turbine_id: Some(r.turbine_id),
            wind_speed: Some(r.wind_speed),
            wind_direction: Some(r.wind_direction),
            power_output: Some(r.power_output),
        }
    }
}

// ---------------------------------------------------------------------------
// Derived records
// ---------------------------------------------------------------------------

/// Per-turbine, per-day statistics of `power_output`. Keyed by
/// `(turbine_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub turbine_id: i64,
    pub date: NaiveDate,
    pub min_power_output: f64,
    pub max_power_output: f64,
    pub mean_power_output: f64,
}

/// One historical data point: a single daily aggregate for one turbine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyValue {
    pub turbine_id: i64,
    pub date: NaiveDate,
    pub value: f64,
}

/// Which daily aggregate a baseline is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMetric {
    /// Sum of `power_output` over the day, from raw readings.
    #[default]
    DailyTotal,
    /// Stored `DailySummary::mean_power_output`.
    DailyMean,
}

/// Historical reference for one turbine. Never persisted.
///
/// `hist_std_daily_output` is `None` when only one day of history was
/// retained (the sample standard deviation is undefined).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalBaseline {
    pub turbine_id: i64,
    pub hist_mean_daily_output: f64,
    pub hist_std_daily_output: Option<f64>,
    pub days: usize,
}

/// A persisted anomaly record. Keyed by `(turbine_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAnomaly {
    pub turbine_id: i64,
    pub date: NaiveDate,
    pub total_power_output: f64,
    pub hist_mean_daily_output: f64,
    pub hist_std_daily_output: f64,
    pub is_anomaly: bool,
}

// ---------------------------------------------------------------------------
// Write semantics
// ---------------------------------------------------------------------------

/// Conflict policy for natural-key collisions on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `ON CONFLICT DO NOTHING`
    InsertOrSkip,
    /// `ON CONFLICT DO UPDATE`
    InsertOrOverwrite,
}

impl WriteMode {
    pub fn from_update_existing(update_existing: bool) -> Self {
        if update_existing {
            WriteMode::InsertOrOverwrite
        } else {
            WriteMode::InsertOrSkip
        }
    }
}
