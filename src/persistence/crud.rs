/// SQL behind `RecordSink` and `HistorySource` for a Postgres transaction
///
/// Every write goes through the caller's transaction, so a run commits or
/// rolls back as a whole. Conflict handling is pushed into the statement
/// (`ON CONFLICT ... DO NOTHING` / `DO UPDATE`) rather than checked first.

use super::{HistorySource, RecordSink, window_start};
use crate::error::Result;
use crate::logging::Stage;
use crate::model::{DailyAnomaly, DailySummary, DailyValue, HistoryMetric, Reading, WriteMode};
use chrono::NaiveDate;
use postgres::Transaction;

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

const INSERT_READING: &str = "
    INSERT INTO turbine_readings
        (timestamp, turbine_id, wind_speed, wind_direction, power_output)
    VALUES ($1, $2, $3, $4, $5)
";

const INSERT_SUMMARY: &str = "
    INSERT INTO daily_summary
        (turbine_id, date, min_power_output, max_power_output, mean_power_output)
    VALUES ($1, $2, $3, $4, $5)
";

const INSERT_ANOMALY: &str = "
    INSERT INTO daily_anomalies
        (turbine_id, date, total_power_output,
         hist_mean_daily_output, hist_std_daily_output, is_anomaly)
    VALUES ($1, $2, $3, $4, $5, $6)
";

const SELECT_DAILY_TOTALS: &str = "
    SELECT turbine_id, CAST(timestamp AS DATE) AS day, SUM(power_output)
    FROM turbine_readings
    WHERE timestamp < $1
      AND ($2::TIMESTAMP IS NULL OR timestamp >= $2)
      AND power_output IS NOT NULL
    GROUP BY turbine_id, day
    ORDER BY turbine_id, day
";

const SELECT_DAILY_MEANS: &str = "
    SELECT turbine_id, date, mean_power_output
    FROM daily_summary
    WHERE date < $1
      AND ($2::DATE IS NULL OR date >= $2)
      AND mean_power_output IS NOT NULL
    ORDER BY turbine_id, date
";

fn with_conflict_clause(
    insert: &str,
    conflict_target: &str,
    update_columns: &[&str],
    mode: WriteMode,
) -> String {
    match mode {
        WriteMode::InsertOrSkip => format!("{insert} ON CONFLICT ({conflict_target}) DO NOTHING"),
        WriteMode::InsertOrOverwrite => {
            let assignments: Vec<String> = update_columns
                .iter()
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect();
            format!(
                "{insert} ON CONFLICT ({conflict_target}) DO UPDATE SET {}",
                assignments.join(", ")
            )
        }
    }
}

// ---------------------------------------------------------------------------
// RecordSink
// ---------------------------------------------------------------------------

impl RecordSink for Transaction<'_> {
    fn write_readings(&mut self, readings: &[Reading], mode: WriteMode) -> Result<usize> {
        let sql = with_conflict_clause(
            INSERT_READING,
            "timestamp, turbine_id",
            &["wind_speed", "wind_direction", "power_output"],
            mode,
        );
        let stmt = self.prepare(&sql)?;

        let mut written = 0;
        for r in readings {
            written += self.execute(
                &stmt,
                &[
                    &r.timestamp,
                    &r.turbine_id,
                    &r.wind_speed,
                    &r.wind_direction,
                    &r.power_output,
                ],
            )?;
        }
        tracing::info!(stage = %Stage::Persist, ?mode, rows = readings.len(), written, "wrote readings");
        Ok(written as usize)
    }

    fn write_daily_summaries(
        &mut self,
        summaries: &[DailySummary],
        mode: WriteMode,
    ) -> Result<usize> {
        let sql = with_conflict_clause(
            INSERT_SUMMARY,
            "turbine_id, date",
            &["min_power_output", "max_power_output", "mean_power_output"],
            mode,
        );
        let stmt = self.prepare(&sql)?;

        let mut written = 0;
        for s in summaries {
            written += self.execute(
                &stmt,
                &[
                    &s.turbine_id,
                    &s.date,
                    &s.min_power_output,
                    &s.max_power_output,
                    &s.mean_power_output,
                ],
            )?;
        }
        tracing::info!(stage = %Stage::Persist, rows = summaries.len(), written, "wrote daily summaries");
        Ok(written as usize)
    }

    fn write_daily_anomalies(
        &mut self,
        anomalies: &[DailyAnomaly],
        mode: WriteMode,
    ) -> Result<usize> {
        let sql = with_conflict_clause(
            INSERT_ANOMALY,
            "turbine_id, date",
            &[
                "total_power_output",
                "hist_mean_daily_output",
                "hist_std_daily_output",
                "is_anomaly",
            ],
            mode,
        );
        let stmt = self.prepare(&sql)?;

        let mut written = 0;
        for a in anomalies {
            written += self.execute(
                &stmt,
                &[
                    &a.turbine_id,
                    &a.date,
                    &a.total_power_output,
                    &a.hist_mean_daily_output,
                    &a.hist_std_daily_output,
                    &a.is_anomaly,
                ],
            )?;
        }
        tracing::info!(stage = %Stage::Persist, rows = anomalies.len(), written, "wrote daily anomalies");
        Ok(written as usize)
    }
}

// ---------------------------------------------------------------------------
// HistorySource
// ---------------------------------------------------------------------------

impl HistorySource for Transaction<'_> {
    fn load_daily_values(
        &mut self,
        metric: HistoryMetric,
        before_date: NaiveDate,
        window_days: Option<u32>,
    ) -> Result<Vec<DailyValue>> {
        let start = window_start(before_date, window_days);

        let rows = match metric {
            HistoryMetric::DailyTotal => {
                let before_ts = before_date.and_time(chrono::NaiveTime::MIN);
                let start_ts = start.map(|d| d.and_time(chrono::NaiveTime::MIN));
                self.query(SELECT_DAILY_TOTALS, &[&before_ts, &start_ts])?
            }
            HistoryMetric::DailyMean => self.query(SELECT_DAILY_MEANS, &[&before_date, &start])?,
        };

        let values: Vec<DailyValue> = rows
            .iter()
            .map(|row| DailyValue {
                turbine_id: row.get(0),
                date: row.get(1),
                value: row.get(2),
            })
            .collect();

        tracing::info!(
            stage = %Stage::Baseline,
            ?metric,
            %before_date,
            window_days = ?window_days,
            rows = values.len(),
            "loaded historical daily values"
        );
        Ok(values)
    }
}
