/// Daily output anomaly detection.
///
/// Today's per-turbine aggregate is left-joined to the historical
/// baselines: every turbine seen today gets an [`AnomalyCheck`], including
/// those with no usable history. A comparison is only made when both a
/// mean and a standard deviation exist; otherwise the verdict is
/// [`AnomalyVerdict::Undetermined`], which is reported but never written
/// as an anomaly.

use super::baseline::load_historical_baselines;
use super::statistics::mean;
use crate::config::AnomalyConfig;
use crate::error::Result;
use crate::logging::Stage;
use crate::model::{DailyAnomaly, HistoricalBaseline, HistoryMetric, Reading};
use crate::persistence::HistorySource;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Why a turbine's history cannot support a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryGap {
    /// No retained day in the window.
    NoHistory,
    /// One retained day: mean defined, std undefined.
    SingleDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyVerdict {
    Anomalous,
    Normal,
    Undetermined(HistoryGap),
}

impl fmt::Display for AnomalyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyVerdict::Anomalous => write!(f, "anomalous"),
            AnomalyVerdict::Normal => write!(f, "normal"),
            AnomalyVerdict::Undetermined(HistoryGap::NoHistory) => {
                write!(f, "undetermined (no history)")
            }
            AnomalyVerdict::Undetermined(HistoryGap::SingleDay) => {
                write!(f, "undetermined (single day of history)")
            }
        }
    }
}

/// One row of the left join between today and the baselines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyCheck {
    pub date: NaiveDate,
    pub turbine_id: i64,
    pub total_power_output: f64,
    pub hist_mean_daily_output: Option<f64>,
    pub hist_std_daily_output: Option<f64>,
    pub history_days: usize,
    pub verdict: AnomalyVerdict,
}

impl AnomalyCheck {
    /// The persisted record, for anomalous rows only.
    pub fn to_anomaly(&self) -> Option<DailyAnomaly> {
        if self.verdict != AnomalyVerdict::Anomalous {
            return None;
        }
        Some(DailyAnomaly {
            turbine_id: self.turbine_id,
            date: self.date,
            total_power_output: self.total_power_output,
            hist_mean_daily_output: self.hist_mean_daily_output?,
            hist_std_daily_output: self.hist_std_daily_output?,
            is_anomaly: true,
        })
    }
}

/// Every check made for one target date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub date: NaiveDate,
    pub metric: HistoryMetric,
    pub sigma_threshold: f64,
    pub checks: Vec<AnomalyCheck>,
}

impl AnomalyReport {
    pub fn anomalies(&self) -> Vec<DailyAnomaly> {
        self.checks.iter().filter_map(AnomalyCheck::to_anomaly).collect()
    }

    pub fn undetermined(&self) -> impl Iterator<Item = &AnomalyCheck> {
        self.checks
            .iter()
            .filter(|c| matches!(c.verdict, AnomalyVerdict::Undetermined(_)))
    }

    pub fn count(&self, verdict: AnomalyVerdict) -> usize {
        self.checks.iter().filter(|c| c.verdict == verdict).count()
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// `total` against `mean ± sigma·std`. Values on the boundary are normal.
pub fn evaluate(total: f64, baseline: Option<&HistoricalBaseline>, sigma: f64) -> AnomalyVerdict {
    let Some(baseline) = baseline else {
        return AnomalyVerdict::Undetermined(HistoryGap::NoHistory);
    };
    let Some(std) = baseline.hist_std_daily_output else {
        return AnomalyVerdict::Undetermined(HistoryGap::SingleDay);
    };

    let upper = baseline.hist_mean_daily_output + sigma * std;
    let lower = baseline.hist_mean_daily_output - sigma * std;
    if total > upper || total < lower {
        AnomalyVerdict::Anomalous
    } else {
        AnomalyVerdict::Normal
    }
}

/// Today's aggregate per turbine: the sum for `DailyTotal`, the mean for
/// `DailyMean`, so it matches the history it is compared with.
pub fn today_values(
    readings: &[Reading],
    date: NaiveDate,
    metric: HistoryMetric,
) -> BTreeMap<i64, f64> {
    let mut per_turbine: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for r in readings.iter().filter(|r| r.date() == date) {
        per_turbine.entry(r.turbine_id).or_default().push(r.power_output);
    }

    per_turbine
        .into_iter()
        .filter_map(|(turbine_id, values)| {
            let value = match metric {
                HistoryMetric::DailyTotal => values.iter().sum(),
                HistoryMetric::DailyMean => mean(&values)?,
            };
            Some((turbine_id, value))
        })
        .collect()
}

/// Left join of today's values against `baselines`.
pub fn compare_with_baselines(
    today: &BTreeMap<i64, f64>,
    date: NaiveDate,
    baselines: &BTreeMap<i64, HistoricalBaseline>,
    sigma: f64,
) -> Vec<AnomalyCheck> {
    today
        .iter()
        .map(|(&turbine_id, &total)| {
            let baseline = baselines.get(&turbine_id);
            let verdict = evaluate(total, baseline, sigma);
            match verdict {
                AnomalyVerdict::Anomalous => tracing::warn!(
                    stage = %Stage::Anomaly,
                    turbine_id,
                    %date,
                    total,
                    "daily output anomaly"
                ),
                AnomalyVerdict::Undetermined(_) => tracing::warn!(
                    stage = %Stage::Anomaly,
                    turbine_id,
                    %date,
                    %verdict,
                    "insufficient history for anomaly check"
                ),
                AnomalyVerdict::Normal => {}
            }
            AnomalyCheck {
                date,
                turbine_id,
                total_power_output: total,
                hist_mean_daily_output: baseline.map(|b| b.hist_mean_daily_output),
                hist_std_daily_output: baseline.and_then(|b| b.hist_std_daily_output),
                history_days: baseline.map_or(0, |b| b.days),
                verdict,
            }
        })
        .collect()
}

/// Summed daily output for `date` compared against precomputed baselines.
pub fn detect_daily_output_sum_anomalies(
    readings: &[Reading],
    date: NaiveDate,
    baselines: &BTreeMap<i64, HistoricalBaseline>,
    sigma: f64,
) -> AnomalyReport {
    let today = today_values(readings, date, HistoryMetric::DailyTotal);
    AnomalyReport {
        date,
        metric: HistoryMetric::DailyTotal,
        sigma_threshold: sigma,
        checks: compare_with_baselines(&today, date, baselines, sigma),
    }
}

/// Loads baselines from `source` and checks today's readings against them.
pub fn detect_anomalies<S: HistorySource + ?Sized>(
    source: &mut S,
    readings: &[Reading],
    date: NaiveDate,
    config: &AnomalyConfig,
) -> Result<AnomalyReport> {
    let baselines =
        load_historical_baselines(source, config.metric, date, config.history_window())?;
    let today = today_values(readings, date, config.metric);
    let report = AnomalyReport {
        date,
        metric: config.metric,
        sigma_threshold: config.sigma_threshold,
        checks: compare_with_baselines(&today, date, &baselines, config.sigma_threshold),
    };

    tracing::info!(
        stage = %Stage::Anomaly,
        %date,
        checked = report.checks.len(),
        anomalous = report.count(AnomalyVerdict::Anomalous),
        undetermined = report.undetermined().count(),
        "anomaly detection complete"
    );
    Ok(report)
}
