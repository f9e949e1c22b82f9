/// Data-quality pipeline.
///
/// Stages run in a fixed order, each consuming the previous stage's
/// output:
///
/// 1. [`remove_duplicates`]: one row per `(timestamp, turbine_id)`
/// 2. [`handle_missing_values`]: bounded forward-fill per turbine
/// 3. [`clean_physical_limits`]: per-channel physical ranges
/// 4. [`detect_and_handle_outliers`]: per-turbine statistical bounds,
///    re-screened until no survivor falls outside them
///
/// Every stage is a fixed point on its own output: re-running it removes
/// nothing further. Diagnostics are collected in a [`CleaningReport`]
/// returned with the cleaned batch.

use crate::analysis::statistics::{mean, quantile, sample_std};
use crate::config::{CleaningConfig, OutlierAction, OutlierDetector, SensorLimits};
use crate::logging::{Stage, log_stage_summary};
use crate::model::{Reading, ReadingRow, SensorField};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Per-run diagnostics of the cleaning stages.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CleaningReport {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    /// Rows without a timestamp or turbine ID.
    pub rows_missing_key: usize,
    /// Turbines that had at least one missing sensor value.
    pub turbines_with_missing_data: BTreeSet<i64>,
    pub values_filled: usize,
    /// Rows still incomplete after forward-fill.
    pub rows_unfillable: usize,
    /// Rows outside each channel's range; a row may count under several.
    pub limit_violations: BTreeMap<SensorField, usize>,
    pub rows_outside_limits: usize,
    pub outliers: usize,
    pub output_rows: usize,
}

/// Output of [`clean_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedBatch {
    pub readings: Vec<Reading>,
    /// Parallel to `readings`; present only when outliers are flagged
    /// rather than dropped.
    pub outlier_flags: Option<Vec<bool>>,
    pub report: CleaningReport,
}

// ---------------------------------------------------------------------------
// 1. Deduplication
// ---------------------------------------------------------------------------

/// Drops rows whose `(timestamp, turbine_id)` was already seen, keeping
/// the first occurrence. Rows missing either key compare equal on that
/// field. Returns the survivors and the number removed.
pub fn remove_duplicates(rows: Vec<ReadingRow>) -> (Vec<ReadingRow>, usize) {
    let before = rows.len();
    let mut seen: HashSet<(Option<NaiveDateTime>, Option<i64>)> = HashSet::with_capacity(before);
    let kept: Vec<ReadingRow> = rows
        .into_iter()
        .filter(|r| seen.insert((r.timestamp, r.turbine_id)))
        .collect();

    let removed = before - kept.len();
    tracing::info!(stage = %Stage::Clean, removed, "removed duplicate rows");
    (kept, removed)
}

// ---------------------------------------------------------------------------
// 2. Missing values
// ---------------------------------------------------------------------------

/// Result of [`handle_missing_values`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MissingValueOutcome {
    /// Complete rows, ordered by turbine then timestamp.
    pub readings: Vec<Reading>,
    pub rows_missing_key: usize,
    pub turbines_with_missing_data: BTreeSet<i64>,
    pub values_filled: usize,
    pub rows_unfillable: usize,
}

/// Forward-fills one channel of a turbine's time-ordered rows.
///
/// At most `limit` consecutive gaps are filled from the last observed
/// value; the remainder of a longer gap stays missing. Leading gaps have
/// nothing to fill from. Returns the number of values filled.
fn forward_fill(rows: &mut [ReadingRow], field: SensorField, limit: usize) -> usize {
    let mut last_valid: Option<f64> = None;
    let mut gap = 0;
    let mut filled = 0;

    for row in rows.iter_mut() {
        match row.sensor(field) {
            Some(v) => {
                last_valid = Some(v);
                gap = 0;
            }
            None => {
                if let Some(v) = last_valid.filter(|_| gap < limit) {
                    row.set_sensor(field, Some(v));
                    filled += 1;
                }
                gap += 1;
            }
        }
    }
    filled
}

/// Drops unkeyed rows, then repairs short sensor gaps per turbine and
/// drops rows that stay incomplete.
///
/// `fill_limit` is the number of consecutive missing samples that may be
/// filled (2 at a 5-minute cadence with a 10-minute gap tolerance).
pub fn handle_missing_values(rows: Vec<ReadingRow>, fill_limit: usize) -> MissingValueOutcome {
    let before = rows.len();
    let mut keyed: Vec<ReadingRow> = rows
        .into_iter()
        .filter(|r| r.timestamp.is_some() && r.turbine_id.is_some())
        .collect();
    let rows_missing_key = before - keyed.len();

    keyed.sort_by_key(|r| (r.turbine_id, r.timestamp));

    let mut turbines_with_missing_data = BTreeSet::new();
    let mut values_filled = 0;

    for partition in keyed.chunk_by_mut(|a, b| a.turbine_id == b.turbine_id) {
        let has_missing = partition
            .iter()
            .any(|r| SensorField::ALL.iter().any(|f| r.sensor(*f).is_none()));
        if has_missing {
            if let Some(turbine_id) = partition[0].turbine_id {
                tracing::warn!(stage = %Stage::Clean, turbine_id, "missing sensor data");
                turbines_with_missing_data.insert(turbine_id);
            }
        }

        for field in SensorField::ALL {
            values_filled += forward_fill(partition, field, fill_limit);
        }
    }

    let keyed_rows = keyed.len();
    let readings: Vec<Reading> = keyed.iter().filter_map(ReadingRow::complete).collect();
    let rows_unfillable = keyed_rows - readings.len();

    if !turbines_with_missing_data.is_empty() {
        tracing::error!(
            stage = %Stage::Clean,
            turbines = ?turbines_with_missing_data,
            "turbines with missing sensor data"
        );
    }
    log_stage_summary(Stage::Clean, before, readings.len());

    MissingValueOutcome {
        readings,
        rows_missing_key,
        turbines_with_missing_data,
        values_filled,
        rows_unfillable,
    }
}

// ---------------------------------------------------------------------------
// 3. Physical limits
// ---------------------------------------------------------------------------

/// Drops every row with a channel outside its configured range.
///
/// Channels are checked independently; a row violating several limits is
/// dropped once. Returns survivors (in input order) and per-channel
/// violation counts.
pub fn clean_physical_limits(
    readings: Vec<Reading>,
    limits: &SensorLimits,
) -> (Vec<Reading>, BTreeMap<SensorField, usize>) {
    let before = readings.len();
    let mut violations: BTreeMap<SensorField, usize> = BTreeMap::new();

    let kept: Vec<Reading> = readings
        .into_iter()
        .filter(|r| {
            let mut valid = true;
            for (field, limit) in limits.iter() {
                if !limit.contains(r.sensor(field)) {
                    *violations.entry(field).or_default() += 1;
                    valid = false;
                }
            }
            valid
        })
        .collect();

    for (field, n) in &violations {
        if let Some(limit) = limits.get(*field) {
            tracing::info!(
                stage = %Stage::Clean,
                %field,
                min = ?limit.min,
                max = ?limit.max,
                "removing {n} rows outside physical limits"
            );
        }
    }
    log_stage_summary(Stage::Clean, before, kept.len());
    (kept, violations)
}

// ---------------------------------------------------------------------------
// 4. Statistical outliers
// ---------------------------------------------------------------------------

/// Inclusive acceptance bounds for one turbine's `power_output` values.
///
/// `None` means no bounds can be established and nothing is an outlier:
/// an empty partition, a constant partition, or fewer than two samples
/// for the std detector.
pub fn outlier_bounds(values: &[f64], detector: OutlierDetector) -> Option<(f64, f64)> {
    let first = *values.first()?;
    if values.iter().all(|v| *v == first) {
        return None;
    }
    match detector {
        OutlierDetector::Std { k } => {
            let m = mean(values)?;
            let sd = sample_std(values)?;
            Some((m - k * sd, m + k * sd))
        }
        OutlierDetector::Iqr { factor } => {
            let q1 = quantile(values, 0.25)?;
            let q3 = quantile(values, 0.75)?;
            let iqr = q3 - q1;
            Some((q1 - factor * iqr, q3 + factor * iqr))
        }
    }
}

/// Outlier mask over `readings`, computed per turbine on `power_output`.
pub fn detect_outliers(readings: &[Reading], detector: OutlierDetector) -> Vec<bool> {
    let mut partitions: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, r) in readings.iter().enumerate() {
        partitions.entry(r.turbine_id).or_default().push(i);
    }

    let mut mask = vec![false; readings.len()];
    for (turbine_id, indices) in partitions {
        let values: Vec<f64> = indices.iter().map(|&i| readings[i].power_output).collect();
        let Some((lo, hi)) = outlier_bounds(&values, detector) else {
            continue;
        };

        let mut n_out = 0;
        for &i in &indices {
            let v = readings[i].power_output;
            if v < lo || v > hi {
                mask[i] = true;
                n_out += 1;
            }
        }
        if n_out > 0 {
            tracing::info!(stage = %Stage::Clean, turbine_id, n_out, "outliers detected");
        }
    }
    mask
}

/// Repeats [`detect_outliers`] on the surviving readings until a pass finds
/// nothing new.
///
/// Removing an extreme value narrows the bounds, so a single pass can
/// leave readings that are outliers relative to the survivors. The
/// returned mask is stable: recomputing the bounds on the unmasked
/// readings flags none of them.
pub fn screen_outliers(readings: &[Reading], detector: OutlierDetector) -> Vec<bool> {
    let mut mask = vec![false; readings.len()];
    let mut passes = 0;
    loop {
        let survivors: Vec<usize> = (0..readings.len()).filter(|&i| !mask[i]).collect();
        let subset: Vec<Reading> = survivors.iter().map(|&i| readings[i].clone()).collect();
        let found = detect_outliers(&subset, detector);
        passes += 1;

        let mut new_outliers = 0;
        for (&i, is_out) in survivors.iter().zip(found) {
            if is_out {
                mask[i] = true;
                new_outliers += 1;
            }
        }
        if new_outliers == 0 {
            break;
        }
    }
    tracing::debug!(stage = %Stage::Clean, passes, "outlier screening converged");
    mask
}

/// Result of [`detect_and_handle_outliers`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierOutcome {
    /// Input order preserved. Outliers are absent in drop mode.
    pub readings: Vec<Reading>,
    /// Parallel flags, only in flag mode.
    pub flags: Option<Vec<bool>>,
    /// Total over every screening pass.
    pub outliers: usize,
}

/// Finds per-turbine outliers with [`screen_outliers`] and drops or flags
/// them.
pub fn detect_and_handle_outliers(
    readings: Vec<Reading>,
    detector: OutlierDetector,
    action: OutlierAction,
) -> OutlierOutcome {
    let before = readings.len();
    let mask = screen_outliers(&readings, detector);
    let outliers = mask.iter().filter(|m| **m).count();
    tracing::info!(stage = %Stage::Clean, ?action, outliers, "outlier screening complete");

    match action {
        OutlierAction::Flag => OutlierOutcome {
            readings,
            flags: Some(mask),
            outliers,
        },
        OutlierAction::Drop => {
            let kept: Vec<Reading> = readings
                .into_iter()
                .zip(mask)
                .filter_map(|(r, is_out)| (!is_out).then_some(r))
                .collect();
            log_stage_summary(Stage::Clean, before, kept.len());
            OutlierOutcome {
                readings: kept,
                flags: None,
                outliers,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// Runs all four stages in order.
pub fn clean_data(rows: Vec<ReadingRow>, config: &CleaningConfig) -> CleanedBatch {
    let input_rows = rows.len();

    let (rows, duplicates_removed) = remove_duplicates(rows);
    let missing = handle_missing_values(rows, config.fill_limit());
    let (readings, limit_violations) =
        clean_physical_limits(missing.readings, &config.sensor_limits);
    let rows_in_limits = readings.len();
    let screened =
        detect_and_handle_outliers(readings, config.outlier_detector, config.outlier_action);

    let report = CleaningReport {
        input_rows,
        duplicates_removed,
        rows_missing_key: missing.rows_missing_key,
        turbines_with_missing_data: missing.turbines_with_missing_data,
        values_filled: missing.values_filled,
        rows_unfillable: missing.rows_unfillable,
        rows_outside_limits: input_rows
            - duplicates_removed
            - missing.rows_missing_key
            - missing.rows_unfillable
            - rows_in_limits,
        limit_violations,
        outliers: screened.outliers,
        output_rows: screened.readings.len(),
    };
    tracing::info!(
        stage = %Stage::Clean,
        input_rows,
        output_rows = report.output_rows,
        "cleaning complete"
    );

    CleanedBatch {
        readings: screened.readings,
        outlier_flags: screened.flags,
        report,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SensorLimit, default_sensor_limits};
    use chrono::NaiveDate;

    fn ts(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::minutes(minute as i64)
    }

    fn row(minute: u32, turbine_id: i64, ws: Option<f64>, power: Option<f64>) -> ReadingRow {
        ReadingRow {
            timestamp: Some(ts(minute)),
            turbine_id: Some(turbine_id),
            wind_speed: ws,
            wind_direction: Some(90.0),
            power_output: power,
        }
    }

    fn reading(minute: u32, turbine_id: i64, power: f64) -> Reading {
        row(minute, turbine_id, Some(10.0), Some(power)).complete().unwrap()
    }

    /// The six-row fixture: two turbines, three 5-minute samples each.
    fn sample_rows() -> Vec<ReadingRow> {
        vec![
            row(0, 1, Some(10.0), Some(100.0)),
            row(5, 1, Some(15.0), Some(150.0)),
            row(10, 1, Some(12.0), Some(120.0)),
            row(15, 2, Some(5.0), Some(50.0)),
            row(20, 2, Some(0.0), Some(0.0)),
            row(25, 2, Some(8.0), Some(70.0)),
        ]
    }

    // --- Deduplication ------------------------------------------------------

    #[test]
    fn test_remove_duplicates_keeps_first() {
        let mut rows = sample_rows();
        let mut dup = rows[0].clone();
        dup.power_output = Some(999.0);
        rows.push(dup);

        let (kept, removed) = remove_duplicates(rows);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 6);
        assert_eq!(kept[0].power_output, Some(100.0));
    }

    #[test]
    fn test_remove_duplicates_is_idempotent() {
        let mut rows = sample_rows();
        rows.extend(sample_rows().into_iter().take(3));
        let (once, _) = remove_duplicates(rows);
        let (twice, removed_again) = remove_duplicates(once.clone());
        assert_eq!(once, twice);
        assert_eq!(removed_again, 0);

        let keys: HashSet<_> = twice.iter().map(|r| (r.timestamp, r.turbine_id)).collect();
        assert_eq!(keys.len(), twice.len());
    }

    // --- Missing values -----------------------------------------------------

    #[test]
    fn test_rows_without_key_are_dropped() {
        let mut rows = sample_rows();
        rows[0].timestamp = None;
        rows[4].turbine_id = None;
        let outcome = handle_missing_values(rows, 2);
        assert_eq!(outcome.rows_missing_key, 2);
        assert_eq!(outcome.readings.len(), 4);
    }

    #[test]
    fn test_isolated_gaps_are_filled_from_previous_sample() {
        let mut rows = sample_rows();
        rows[2].wind_speed = None;
        rows[4].power_output = None;
        let outcome = handle_missing_values(rows, 2);

        assert_eq!(outcome.readings.len(), 6);
        assert_eq!(outcome.values_filled, 2);
        assert_eq!(outcome.readings[2].wind_speed, 15.0);
        assert_eq!(outcome.readings[4].power_output, 50.0);
        assert_eq!(outcome.turbines_with_missing_data, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_gap_of_two_is_fully_filled() {
        let rows = vec![
            row(0, 1, Some(10.0), Some(100.0)),
            row(5, 1, None, Some(100.0)),
            row(10, 1, None, Some(100.0)),
            row(15, 1, Some(11.0), Some(100.0)),
        ];
        let outcome = handle_missing_values(rows, 2);
        assert_eq!(outcome.readings.len(), 4);
        assert_eq!(outcome.rows_unfillable, 0);
        assert!(outcome.readings[1..3].iter().all(|r| r.wind_speed == 10.0));
    }

    #[test]
    fn test_gap_of_three_leaves_one_row_dropped() {
        let rows = vec![
            row(0, 1, Some(10.0), Some(100.0)),
            row(5, 1, None, Some(100.0)),
            row(10, 1, None, Some(100.0)),
            row(15, 1, None, Some(100.0)),
            row(20, 1, Some(11.0), Some(100.0)),
        ];
        let outcome = handle_missing_values(rows, 2);
        assert_eq!(outcome.readings.len(), 4);
        assert_eq!(outcome.values_filled, 2);
        assert_eq!(outcome.rows_unfillable, 1);
        assert!(outcome.readings.iter().all(|r| r.timestamp != ts(15)));
    }

    #[test]
    fn test_leading_gap_cannot_be_filled() {
        let rows = vec![
            row(0, 1, None, Some(100.0)),
            row(5, 1, Some(10.0), Some(100.0)),
        ];
        let outcome = handle_missing_values(rows, 2);
        assert_eq!(outcome.readings.len(), 1);
        assert_eq!(outcome.rows_unfillable, 1);
    }

    #[test]
    fn test_fill_never_crosses_turbines() {
        let rows = vec![
            row(0, 1, Some(10.0), Some(100.0)),
            row(0, 2, None, Some(100.0)),
        ];
        let outcome = handle_missing_values(rows, 2);
        assert_eq!(outcome.readings.len(), 1);
        assert_eq!(outcome.readings[0].turbine_id, 1);
    }

    #[test]
    fn test_fill_follows_timestamp_order_not_input_order() {
        let rows = vec![
            row(10, 1, None, Some(100.0)),
            row(0, 1, Some(7.0), Some(100.0)),
            row(5, 1, Some(8.0), Some(100.0)),
        ];
        let outcome = handle_missing_values(rows, 2);
        assert_eq!(outcome.readings.len(), 3);
        assert_eq!(outcome.readings[2].timestamp, ts(10));
        assert_eq!(outcome.readings[2].wind_speed, 8.0);
    }

    // --- Physical limits ----------------------------------------------------

    #[test]
    fn test_physical_limits_drop_out_of_range_rows() {
        let mut rows = sample_rows();
        rows[3].wind_speed = Some(25.0);
        rows[4].wind_speed = Some(3.0);
        let readings: Vec<Reading> = rows.iter().filter_map(ReadingRow::complete).collect();

        let limits = SensorLimits::default()
            .with(SensorField::WindSpeed, SensorLimit::new(Some(5.0), Some(20.0)));
        let (kept, violations) = clean_physical_limits(readings, &limits);

        assert_eq!(kept.len(), 4);
        assert_eq!(violations[&SensorField::WindSpeed], 2);
    }

    #[test]
    fn test_row_violating_two_limits_is_dropped_once() {
        let mut r = reading(0, 1, -5.0);
        r.wind_speed = 150.0;
        let readings = vec![r, reading(5, 1, 10.0)];
        let (kept, violations) = clean_physical_limits(readings, &default_sensor_limits());
        assert_eq!(kept.len(), 1);
        assert_eq!(violations[&SensorField::WindSpeed], 1);
        assert_eq!(violations[&SensorField::PowerOutput], 1);
    }

    #[test]
    fn test_limits_are_inclusive_and_open_bounds_unchecked() {
        let readings = vec![reading(0, 1, 0.0), reading(5, 1, 1.0e7)];
        let (kept, _) = clean_physical_limits(readings, &default_sensor_limits());
        assert_eq!(kept.len(), 2);
    }

    // --- Outliers -----------------------------------------------------------

    fn turbine_series(turbine_id: i64, values: &[f64]) -> Vec<Reading> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| reading(i as u32 * 5, turbine_id, *v))
            .collect()
    }

    fn spiky_series() -> Vec<Reading> {
        let mut values: Vec<f64> = [95.0, 105.0].repeat(10);
        values.push(1000.0);
        turbine_series(1, &values)
    }

    #[test]
    fn test_std_outlier_is_dropped() {
        let outcome = detect_and_handle_outliers(
            spiky_series(),
            OutlierDetector::Std { k: 3.0 },
            OutlierAction::Drop,
        );
        assert_eq!(outcome.outliers, 1);
        assert_eq!(outcome.readings.len(), 20);
        assert!(outcome.readings.iter().all(|r| r.power_output < 1000.0));
        assert!(outcome.flags.is_none());
    }

    #[test]
    fn test_flag_mode_keeps_rows() {
        let outcome = detect_and_handle_outliers(
            spiky_series(),
            OutlierDetector::Std { k: 3.0 },
            OutlierAction::Flag,
        );
        let flags = outcome.flags.expect("flag mode returns flags");
        assert_eq!(outcome.readings.len(), 21);
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        assert!(flags[20]);
    }

    #[test]
    fn test_iqr_outlier_is_dropped() {
        let readings = turbine_series(1, &[10.0, 11.0, 12.0, 13.0, 14.0, 100.0]);
        let outcome = detect_and_handle_outliers(
            readings,
            OutlierDetector::Iqr { factor: 1.5 },
            OutlierAction::Drop,
        );
        assert_eq!(outcome.outliers, 1);
        assert_eq!(outcome.readings.len(), 5);
    }

    #[test]
    fn test_zero_variance_partition_has_no_outliers() {
        let readings = turbine_series(1, &[0.1, 0.1, 0.1, 0.1]);
        assert_eq!(outlier_bounds(&[0.1, 0.1, 0.1], OutlierDetector::Std { k: 3.0 }), None);
        assert_eq!(outlier_bounds(&[0.1, 0.1, 0.1], OutlierDetector::Iqr { factor: 1.5 }), None);
        let mask = detect_outliers(&readings, OutlierDetector::Std { k: 3.0 });
        assert!(mask.iter().all(|m| !m));
    }

    #[test]
    fn test_single_sample_partition_has_no_outliers() {
        let readings = turbine_series(4, &[42.0]);
        assert_eq!(outlier_bounds(&[42.0], OutlierDetector::Std { k: 3.0 }), None);
        assert!(detect_outliers(&readings, OutlierDetector::Std { k: 3.0 }) == vec![false]);
    }

    #[test]
    fn test_bounds_are_per_turbine() {
        let mut readings = turbine_series(1, &[100.0; 10]);
        readings.extend(turbine_series(2, &[1.0, 2.0, 3.0, 2.0, 1.0]));
        let mask = detect_outliers(&readings, OutlierDetector::Std { k: 3.0 });
        assert!(mask.iter().all(|m| !m));
    }

    #[test]
    fn test_outlier_drop_is_a_fixed_point() {
        let first = detect_and_handle_outliers(
            spiky_series(),
            OutlierDetector::Std { k: 3.0 },
            OutlierAction::Drop,
        );
        let second = detect_and_handle_outliers(
            first.readings.clone(),
            OutlierDetector::Std { k: 3.0 },
            OutlierAction::Drop,
        );
        assert_eq!(second.outliers, 0);
        assert_eq!(second.readings, first.readings);
    }

    /// Dropping the spike tightens the bounds enough to expose the 10.
    fn masked_series() -> Vec<Reading> {
        let mut values = vec![0.0; 20];
        values.extend([10.0, 1000.0]);
        turbine_series(1, &values)
    }

    #[test]
    fn test_outlier_drop_repeats_until_stable() {
        let first = detect_and_handle_outliers(
            masked_series(),
            OutlierDetector::Std { k: 3.0 },
            OutlierAction::Drop,
        );
        assert_eq!(first.outliers, 2);
        assert_eq!(first.readings.len(), 20);
        assert!(first.readings.iter().all(|r| r.power_output == 0.0));

        let second = detect_and_handle_outliers(
            first.readings.clone(),
            OutlierDetector::Std { k: 3.0 },
            OutlierAction::Drop,
        );
        assert_eq!(second.outliers, 0);
        assert_eq!(second.readings, first.readings);
    }

    #[test]
    fn test_flag_mode_marks_every_pass() {
        let outcome = detect_and_handle_outliers(
            masked_series(),
            OutlierDetector::Std { k: 3.0 },
            OutlierAction::Flag,
        );
        let flags = outcome.flags.unwrap();
        assert_eq!(outcome.readings.len(), 22);
        assert_eq!(outcome.outliers, 2);
        assert!(flags[20] && flags[21]);
        assert!(flags[..20].iter().all(|f| !f));
    }

    // --- Full pipeline ------------------------------------------------------

    #[test]
    fn test_clean_data_with_custom_wind_speed_limits() {
        let mut rows = sample_rows();
        rows[2].wind_speed = Some(25.0);
        rows[4].wind_speed = Some(3.0);

        let config = CleaningConfig {
            sensor_limits: SensorLimits::default()
                .with(SensorField::WindSpeed, SensorLimit::new(Some(5.0), Some(20.0))),
            ..CleaningConfig::default()
        };
        let cleaned = clean_data(rows, &config);

        assert_eq!(cleaned.readings.len(), 4);
        assert_eq!(cleaned.report.rows_outside_limits, 2);
        assert_eq!(cleaned.report.output_rows, 4);
    }

    #[test]
    fn test_clean_data_is_idempotent() {
        let mut rows = sample_rows();
        rows.push(rows[0].clone());
        rows[3].wind_speed = None;
        let config = CleaningConfig::default();

        let once = clean_data(rows, &config);
        let again_rows: Vec<ReadingRow> = once.readings.iter().cloned().map(ReadingRow::from).collect();
        let twice = clean_data(again_rows, &config);

        assert_eq!(twice.readings, once.readings);
        assert_eq!(twice.report.duplicates_removed, 0);
        assert_eq!(twice.report.values_filled, 0);
        assert_eq!(twice.report.rows_outside_limits, 0);
        assert_eq!(twice.report.outliers, 0);
    }

    #[test]
    fn test_clean_data_survivors_lie_within_their_own_bounds() {
        let mut rows = Vec::new();
        let mut turbine_1 = vec![0.0; 20];
        turbine_1.extend([10.0, 1000.0]);
        let mut turbine_2: Vec<f64> = [95.0, 105.0].repeat(10);
        turbine_2.push(1000.0);
        for (turbine_id, values) in [(1, turbine_1), (2, turbine_2)] {
            for (i, v) in values.iter().enumerate() {
                rows.push(row(i as u32 * 5, turbine_id, Some(10.0), Some(*v)));
            }
        }
        let config = CleaningConfig::default();

        let cleaned = clean_data(rows, &config);
        assert_eq!(cleaned.report.outliers, 3);

        for turbine_id in [1, 2] {
            let values: Vec<f64> = cleaned
                .readings
                .iter()
                .filter(|r| r.turbine_id == turbine_id)
                .map(|r| r.power_output)
                .collect();
            if let Some((lo, hi)) = outlier_bounds(&values, config.outlier_detector) {
                assert!(values.iter().all(|v| *v >= lo && *v <= hi), "turbine {turbine_id}");
            }
        }
    }
}
