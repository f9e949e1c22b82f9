/// Descriptive statistics and the per-day aggregator.

use crate::model::{DailySummary, Reading};
use chrono::NaiveDate;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Reductions
// ---------------------------------------------------------------------------

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (N−1 denominator).
///
/// `None` for fewer than two values, where it is undefined.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Quantile with linear interpolation between closest ranks.
///
/// `q` is clamped to `[0, 1]`. `None` for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Min, max and mean `power_output` per `(turbine_id, date)`.
///
/// Dates are the calendar day of the naive timestamp. Output is ordered by
/// date, then turbine.
pub fn calculate_daily_summary(readings: &[Reading]) -> Vec<DailySummary> {
    let mut groups: BTreeMap<(NaiveDate, i64), Vec<f64>> = BTreeMap::new();
    for r in readings {
        groups
            .entry((r.date(), r.turbine_id))
            .or_default()
            .push(r.power_output);
    }

    groups
        .into_iter()
        .filter_map(|((date, turbine_id), values)| {
            Some(DailySummary {
                turbine_id,
                date,
                min_power_output: values.iter().copied().reduce(f64::min)?,
                max_power_output: values.iter().copied().reduce(f64::max)?,
                mean_power_output: mean(&values)?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
