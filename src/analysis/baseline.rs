/// Trailing-window historical baselines.
///
/// A baseline is the sample mean and standard deviation of one daily
/// aggregate (summed total or stored mean) over the days strictly before
/// the reference date. Turbines with no retained day get no baseline at
/// all; callers must treat that as missing history, never as zero.

use super::statistics::{mean, sample_std};
use crate::error::Result;
use crate::logging::Stage;
use crate::model::{DailySummary, DailyValue, HistoricalBaseline, HistoryMetric, Reading};
use crate::persistence::{HistorySource, in_window};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Sum of `power_output` per `(turbine_id, date)`.
pub fn daily_totals(readings: &[Reading]) -> Vec<DailyValue> {
    let mut totals: BTreeMap<(i64, NaiveDate), f64> = BTreeMap::new();
    for r in readings {
        *totals.entry((r.turbine_id, r.date())).or_default() += r.power_output;
    }
    totals
        .into_iter()
        .map(|((turbine_id, date), value)| DailyValue { turbine_id, date, value })
        .collect()
}

/// Mean and sample std per turbine over values inside the window.
///
/// Values dated on or after `before_date`, or before the window start, are
/// ignored, so the caller may pass unfiltered history.
pub fn estimate_baselines(
    history: &[DailyValue],
    before_date: NaiveDate,
    window_days: Option<u32>,
) -> BTreeMap<i64, HistoricalBaseline> {
    let mut per_turbine: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for v in history.iter().filter(|v| in_window(v.date, before_date, window_days)) {
        per_turbine.entry(v.turbine_id).or_default().push(v.value);
    }

    per_turbine
        .into_iter()
        .filter_map(|(turbine_id, values)| {
            let baseline = HistoricalBaseline {
                turbine_id,
                hist_mean_daily_output: mean(&values)?,
                hist_std_daily_output: sample_std(&values),
                days: values.len(),
            };
            Some((turbine_id, baseline))
        })
        .collect()
}

/// Baselines from raw readings, using summed daily totals.
pub fn baseline_from_readings(
    readings: &[Reading],
    before_date: NaiveDate,
    window_days: Option<u32>,
) -> BTreeMap<i64, HistoricalBaseline> {
    estimate_baselines(&daily_totals(readings), before_date, window_days)
}

/// Baselines from stored daily summaries, using their means.
pub fn baseline_from_summaries(
    summaries: &[DailySummary],
    before_date: NaiveDate,
    window_days: Option<u32>,
) -> BTreeMap<i64, HistoricalBaseline> {
    let history: Vec<DailyValue> = summaries
        .iter()
        .map(|s| DailyValue {
            turbine_id: s.turbine_id,
            date: s.date,
            value: s.mean_power_output,
        })
        .collect();
    estimate_baselines(&history, before_date, window_days)
}

/// Loads history from `source` and reduces it to baselines.
pub fn load_historical_baselines<S: HistorySource + ?Sized>(
    source: &mut S,
    metric: HistoryMetric,
    before_date: NaiveDate,
    window_days: Option<u32>,
) -> Result<BTreeMap<i64, HistoricalBaseline>> {
    let history = source.load_daily_values(metric, before_date, window_days)?;
    let baselines = estimate_baselines(&history, before_date, window_days);
    tracing::info!(
        stage = %Stage::Baseline,
        %before_date,
        history_rows = history.len(),
        turbines = baselines.len(),
        "estimated historical baselines"
    );
    Ok(baselines)
}
