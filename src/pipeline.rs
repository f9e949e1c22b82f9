/// Batch orchestration
///
/// One batch flows through: target-date filter -> clean -> daily summary
/// -> write readings -> write summaries -> (with a target date) baseline
/// load, anomaly check, write anomalies. All writes for a batch go through
/// one store handle that the caller commits or discards as a unit.

use crate::analysis::anomaly::{AnomalyReport, detect_anomalies};
use crate::analysis::statistics::calculate_daily_summary;
use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::groups::group_name_from_path;
use crate::ingest::cleaning::{CleaningReport, clean_data};
use crate::ingest::validation::ValidatedBatch;
use crate::ingest::{filter_target_date, read_and_validate_csv};
use crate::logging::{Stage, log_stage_summary};
use crate::model::{ReadingRow, WriteMode};
use crate::persistence::db::create_schema;
use crate::persistence::{HistorySource, MemoryStore, RecordSink};
use chrono::{NaiveDate, NaiveDateTime};
use postgres::Client;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOptions {
    /// Restrict the batch to this day and run anomaly detection for it.
    pub target_date: Option<NaiveDate>,
    /// Overrides the group derived from the file path.
    pub group_name: Option<String>,
    /// Overwrite readings whose `(timestamp, turbine_id)` already exists.
    pub update_existing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Nothing in the batch fell on the target date; nothing was written.
    NoDataForTargetDate,
}

/// A reading kept in flag mode despite falling outside the outlier bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedReading {
    pub timestamp: NaiveDateTime,
    pub turbine_id: i64,
    pub power_output: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub status: RunStatus,
    pub source: Option<PathBuf>,
    pub group_name: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub missing_turbines: BTreeSet<i64>,
    pub rows_in: usize,
    pub cleaning: Option<CleaningReport>,
    pub flagged_outliers: Vec<FlaggedReading>,
    pub daily_summaries: usize,
    pub readings_written: usize,
    pub summaries_written: usize,
    pub anomalies_written: usize,
    pub anomaly_report: Option<AnomalyReport>,
}

impl PipelineReport {
    fn new(rows_in: usize, target_date: Option<NaiveDate>) -> Self {
        PipelineReport {
            status: RunStatus::Completed,
            source: None,
            group_name: None,
            target_date,
            missing_turbines: BTreeSet::new(),
            rows_in,
            cleaning: None,
            flagged_outliers: Vec::new(),
            daily_summaries: 0,
            readings_written: 0,
            summaries_written: 0,
            anomalies_written: 0,
            anomaly_report: None,
        }
    }

    fn with_batch(mut self, path: &Path, batch: &ValidatedBatch) -> Self {
        self.source = Some(path.to_path_buf());
        self.group_name = Some(batch.group_name.clone());
        self.missing_turbines = batch.missing_turbines.clone();
        self
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// Runs an already-validated batch against `store`.
///
/// Readings are written with the `update_existing` policy; summaries and
/// anomalies are insert-if-absent. The first write failure is returned
/// and the caller is expected to discard the store handle.
pub fn process_batch<S>(
    store: &mut S,
    rows: Vec<ReadingRow>,
    options: &PipelineOptions,
    config: &PipelineConfig,
) -> Result<PipelineReport>
where
    S: RecordSink + HistorySource + ?Sized,
{
    let mut report = PipelineReport::new(rows.len(), options.target_date);

    let rows = match options.target_date {
        Some(date) => {
            let rows = filter_target_date(rows, date);
            if rows.is_empty() {
                tracing::warn!(
                    stage = %Stage::Validate,
                    %date,
                    "no data for target date, skipping insert"
                );
                report.status = RunStatus::NoDataForTargetDate;
                return Ok(report);
            }
            rows
        }
        None => rows,
    };

    let cleaned = clean_data(rows, &config.cleaning);
    if let Some(flags) = &cleaned.outlier_flags {
        report.flagged_outliers = cleaned
            .readings
            .iter()
            .zip(flags)
            .filter(|(_, flagged)| **flagged)
            .map(|(r, _)| FlaggedReading {
                timestamp: r.timestamp,
                turbine_id: r.turbine_id,
                power_output: r.power_output,
            })
            .collect();
    }

    let summaries = calculate_daily_summary(&cleaned.readings);
    log_stage_summary(Stage::Aggregate, cleaned.readings.len(), summaries.len());
    report.daily_summaries = summaries.len();

    if !cleaned.readings.is_empty() {
        report.readings_written = store.write_readings(
            &cleaned.readings,
            WriteMode::from_update_existing(options.update_existing),
        )?;
    }
    if !summaries.is_empty() {
        report.summaries_written =
            store.write_daily_summaries(&summaries, WriteMode::InsertOrSkip)?;
    }

    if let Some(date) = options.target_date {
        let anomaly_report = detect_anomalies(store, &cleaned.readings, date, &config.anomaly)?;
        let anomalies = anomaly_report.anomalies();
        if !anomalies.is_empty() {
            report.anomalies_written =
                store.write_daily_anomalies(&anomalies, WriteMode::InsertOrSkip)?;
        }
        report.anomaly_report = Some(anomaly_report);
    }

    report.cleaning = Some(cleaned.report);
    Ok(report)
}

// ---------------------------------------------------------------------------
// File runs
// ---------------------------------------------------------------------------

/// Explicit group name, or one derived from the file location.
pub fn resolve_group_name(path: &Path, options: &PipelineOptions) -> Result<String> {
    options
        .group_name
        .clone()
        .or_else(|| group_name_from_path(path))
        .ok_or_else(|| IngestError::InvalidGroupName(path.display().to_string()))
}

fn load_batch(
    path: &Path,
    options: &PipelineOptions,
    config: &PipelineConfig,
) -> Result<ValidatedBatch> {
    let group_name = resolve_group_name(path, options)?;
    read_and_validate_csv(path, &group_name, &config.turbine_groups)
}

/// Reads, validates and processes one CSV file inside a single Postgres
/// transaction. Any error rolls the whole batch back.
pub fn run_pipeline(
    client: &mut Client,
    path: &Path,
    options: &PipelineOptions,
    config: &PipelineConfig,
) -> Result<PipelineReport> {
    create_schema(client)?;
    let batch = load_batch(path, options, config)?;

    let mut tx = client.transaction()?;
    let report = process_batch(&mut tx, batch.rows.clone(), options, config)?;
    tx.commit()?;

    tracing::info!(stage = %Stage::Persist, path = %path.display(), "batch committed");
    Ok(report.with_batch(path, &batch))
}

/// Same as [`run_pipeline`] against an in-memory store.
pub fn run_pipeline_in_memory(
    store: &mut MemoryStore,
    path: &Path,
    options: &PipelineOptions,
    config: &PipelineConfig,
) -> Result<PipelineReport> {
    let batch = load_batch(path, options, config)?;
    let report = store.atomically(|s| process_batch(s, batch.rows.clone(), options, config))?;
    Ok(report.with_batch(path, &batch))
}

/// `YYYY-MM-DD.csv` files in `folder`, oldest first.
///
/// Other files are skipped with a warning; each date is the target date of
/// its batch.
pub fn dated_batches(folder: &Path) -> Result<Vec<(NaiveDate, PathBuf)>> {
    let mut batches = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let date = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        match date {
            Some(date) => batches.push((date, path)),
            None => tracing::warn!(path = %path.display(), "skipping file without a date name"),
        }
    }
    batches.sort();
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::anomaly::{AnomalyVerdict, HistoryGap};
    use crate::config::OutlierAction;
    use crate::model::Reading;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn row(d: u32, hour: u32, turbine_id: i64, power: f64) -> ReadingRow {
        ReadingRow {
            timestamp: day(d).and_hms_opt(hour, 0, 0),
            turbine_id: Some(turbine_id),
            wind_speed: Some(10.0),
            wind_direction: Some(180.0),
            power_output: Some(power),
        }
    }

    fn seed_history(store: &mut MemoryStore, turbine_id: i64, totals: &[(u32, f64)]) {
        let readings: Vec<Reading> = totals
            .iter()
            .filter_map(|(d, total)| row(*d, 12, turbine_id, *total).complete())
            .collect();
        store.write_readings(&readings, WriteMode::InsertOrSkip).unwrap();
    }

    #[test]
    fn test_batch_without_target_date_skips_anomalies() {
        let mut store = MemoryStore::new();
        let rows = vec![row(1, 0, 1, 10.0), row(2, 0, 1, 20.0)];
        let report = process_batch(
            &mut store,
            rows,
            &PipelineOptions::default(),
            &PipelineConfig::default(),
        )
        .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.readings_written, 2);
        assert_eq!(report.summaries_written, 2);
        assert!(report.anomaly_report.is_none());
    }

    #[test]
    fn test_no_rows_on_target_date_writes_nothing() {
        let mut store = MemoryStore::new();
        let options = PipelineOptions { target_date: Some(day(9)), ..Default::default() };
        let report =
            process_batch(&mut store, vec![row(1, 0, 1, 10.0)], &options, &PipelineConfig::default())
                .unwrap();

        assert_eq!(report.status, RunStatus::NoDataForTargetDate);
        assert!(store.is_empty());
    }

    #[test]
    fn test_anomaly_written_for_high_daily_total() {
        let mut store = MemoryStore::new();
        seed_history(&mut store, 1, &[(1, 100.0), (2, 110.0), (3, 90.0)]);

        let options = PipelineOptions { target_date: Some(day(4)), ..Default::default() };
        let rows = vec![row(4, 0, 1, 60.0), row(4, 1, 1, 65.0), row(4, 0, 2, 5.0)];
        let report = process_batch(&mut store, rows, &options, &PipelineConfig::default()).unwrap();

        let anomaly_report = report.anomaly_report.unwrap();
        assert_eq!(anomaly_report.count(AnomalyVerdict::Anomalous), 1);
        assert_eq!(report.anomalies_written, 1);
        assert_eq!(store.daily_anomalies().count(), 1);

        let t2 = anomaly_report.checks.iter().find(|c| c.turbine_id == 2).unwrap();
        assert_eq!(t2.verdict, AnomalyVerdict::Undetermined(HistoryGap::NoHistory));
    }

    #[test]
    fn test_flag_mode_keeps_and_reports_outliers() {
        let mut config = PipelineConfig::default();
        config.cleaning.outlier_action = OutlierAction::Flag;

        let mut rows: Vec<ReadingRow> = (0..20)
            .map(|h| row(1, h, 1, if h % 2 == 0 { 95.0 } else { 105.0 }))
            .collect();
        rows.push(row(1, 20, 1, 1000.0));

        let mut store = MemoryStore::new();
        let report = process_batch(&mut store, rows, &PipelineOptions::default(), &config).unwrap();

        assert_eq!(report.readings_written, 21);
        assert_eq!(report.flagged_outliers.len(), 1);
        assert_eq!(report.flagged_outliers[0].power_output, 1000.0);
    }

    #[test]
    fn test_dated_batches_sorted_by_date() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2025-04-03.csv", "2025-04-01.csv", "notes.csv", "2025-04-02.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let batches = dated_batches(dir.path()).unwrap();
        let dates: Vec<NaiveDate> = batches.iter().map(|(d, _)| *d).collect();
        assert_eq!(dates, vec![day(1), day(3)]);
    }

    #[test]
    fn test_resolve_group_name_prefers_explicit_option() {
        let path = Path::new("data/data_group_2.csv");
        assert_eq!(resolve_group_name(path, &PipelineOptions::default()).unwrap(), "data_group_2");

        let options = PipelineOptions { group_name: Some("data_group_3".into()), ..Default::default() };
        assert_eq!(resolve_group_name(path, &options).unwrap(), "data_group_3");
    }
}
