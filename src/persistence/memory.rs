/// Map-backed store with the same natural keys and conflict rules as the
/// Postgres schema.

use super::{HistorySource, RecordSink, in_window};
use crate::error::Result;
use crate::model::{DailyAnomaly, DailySummary, DailyValue, HistoryMetric, Reading, WriteMode};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    readings: BTreeMap<(NaiveDateTime, i64), Reading>,
    summaries: BTreeMap<(i64, NaiveDate), DailySummary>,
    anomalies: BTreeMap<(i64, NaiveDate), DailyAnomaly>,
}

/// Insert with the given conflict policy. Returns 1 if the map changed.
fn upsert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V, mode: WriteMode) -> usize {
    match (map.entry(key), mode) {
        (Entry::Vacant(slot), _) => {
            slot.insert(value);
            1
        }
        (Entry::Occupied(mut slot), WriteMode::InsertOrOverwrite) => {
            slot.insert(value);
            1
        }
        (Entry::Occupied(_), WriteMode::InsertOrSkip) => 0,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against a staged copy and keeps its writes only on `Ok`.
    pub fn atomically<T>(&mut self, f: impl FnOnce(&mut MemoryStore) -> Result<T>) -> Result<T> {
        let mut staged = self.clone();
        let out = f(&mut staged)?;
        *self = staged;
        Ok(out)
    }

    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.values()
    }

    pub fn daily_summaries(&self) -> impl Iterator<Item = &DailySummary> {
        self.summaries.values()
    }

    pub fn daily_anomalies(&self) -> impl Iterator<Item = &DailyAnomaly> {
        self.anomalies.values()
    }

    pub fn reading(&self, timestamp: NaiveDateTime, turbine_id: i64) -> Option<&Reading> {
        self.readings.get(&(timestamp, turbine_id))
    }

    pub fn daily_summary(&self, turbine_id: i64, date: NaiveDate) -> Option<&DailySummary> {
        self.summaries.get(&(turbine_id, date))
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty() && self.summaries.is_empty() && self.anomalies.is_empty()
    }
}

impl RecordSink for MemoryStore {
    fn write_readings(&mut self, readings: &[Reading], mode: WriteMode) -> Result<usize> {
        Ok(readings
            .iter()
            .map(|r| upsert(&mut self.readings, (r.timestamp, r.turbine_id), r.clone(), mode))
            .sum())
    }

    fn write_daily_summaries(
        &mut self,
        summaries: &[DailySummary],
        mode: WriteMode,
    ) -> Result<usize> {
        Ok(summaries
            .iter()
            .map(|s| upsert(&mut self.summaries, (s.turbine_id, s.date), s.clone(), mode))
            .sum())
    }

    fn write_daily_anomalies(
        &mut self,
        anomalies: &[DailyAnomaly],
        mode: WriteMode,
    ) -> Result<usize> {
        Ok(anomalies
            .iter()
            .map(|a| upsert(&mut self.anomalies, (a.turbine_id, a.date), a.clone(), mode))
            .sum())
    }
}

impl HistorySource for MemoryStore {
    fn load_daily_values(
        &mut self,
        metric: HistoryMetric,
        before_date: NaiveDate,
        window_days: Option<u32>,
    ) -> Result<Vec<DailyValue>> {
        let values = match metric {
            HistoryMetric::DailyTotal => {
                let mut totals: BTreeMap<(i64, NaiveDate), f64> = BTreeMap::new();
                for r in self
                    .readings
                    .values()
                    .filter(|r| in_window(r.date(), before_date, window_days))
                {
                    *totals.entry((r.turbine_id, r.date())).or_default() += r.power_output;
                }
                totals
                    .into_iter()
                    .map(|((turbine_id, date), value)| DailyValue { turbine_id, date, value })
                    .collect()
            }
            HistoryMetric::DailyMean => self
                .summaries
                .values()
                .filter(|s| in_window(s.date, before_date, window_days))
                .map(|s| DailyValue {
                    turbine_id: s.turbine_id,
                    date: s.date,
                    value: s.mean_power_output,
                })
                .collect(),
        };
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn reading(d: u32, hour: u32, turbine_id: i64, power_output: f64) -> Reading {
        Reading {
            timestamp: day(d).and_hms_opt(hour, 0, 0).unwrap(),
            turbine_id,
            wind_speed: 10.0,
            wind_direction: 180.0,
            power_output,
        }
    }

    fn summary(d: u32, turbine_id: i64, mean: f64) -> DailySummary {
        DailySummary {
            turbine_id,
            date: day(d),
            min_power_output: mean,
            max_power_output: mean,
            mean_power_output: mean,
        }
    }

    // --- Conflict semantics -------------------------------------------------

    #[test]
    fn test_insert_or_skip_keeps_first_write() {
        let mut store = MemoryStore::new();
        let first = reading(1, 0, 1, 100.0);
        let second = reading(1, 0, 1, 200.0);

        assert_eq!(store.write_readings(&[first.clone()], WriteMode::InsertOrSkip).unwrap(), 1);
        assert_eq!(store.write_readings(&[second], WriteMode::InsertOrSkip).unwrap(), 0);
        assert_eq!(store.reading(first.timestamp, 1).unwrap().power_output, 100.0);
    }

    #[test]
    fn test_insert_or_overwrite_replaces() {
        let mut store = MemoryStore::new();
        let first = reading(1, 0, 1, 100.0);
        store.write_readings(&[first.clone()], WriteMode::InsertOrSkip).unwrap();

        let second = reading(1, 0, 1, 200.0);
        assert_eq!(store.write_readings(&[second], WriteMode::InsertOrOverwrite).unwrap(), 1);
        assert_eq!(store.readings().count(), 1);
        assert_eq!(store.reading(first.timestamp, 1).unwrap().power_output, 200.0);
    }

    #[test]
    fn test_summary_rewrite_is_skipped() {
        let mut store = MemoryStore::new();
        store.write_daily_summaries(&[summary(1, 1, 10.0)], WriteMode::InsertOrSkip).unwrap();
        let n = store.write_daily_summaries(&[summary(1, 1, 99.0)], WriteMode::InsertOrSkip).unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.daily_summary(1, day(1)).unwrap().mean_power_output, 10.0);
    }

    // --- Atomicity ----------------------------------------------------------

    #[test]
    fn test_failed_closure_leaves_store_untouched() {
        let mut store = MemoryStore::new();
        let result: Result<()> = store.atomically(|s| {
            s.write_readings(&[reading(1, 0, 1, 100.0)], WriteMode::InsertOrSkip)?;
            Err(IngestError::Config("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_successful_closure_commits() {
        let mut store = MemoryStore::new();
        let n = store
            .atomically(|s| s.write_readings(&[reading(1, 0, 1, 100.0)], WriteMode::InsertOrSkip))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.readings().count(), 1);
    }

    // --- History ------------------------------------------------------------

    #[test]
    fn test_daily_totals_sum_readings_inside_window() {
        let mut store = MemoryStore::new();
        let readings = vec![
            reading(1, 0, 1, 40.0),
            reading(1, 1, 1, 60.0),
            reading(2, 0, 1, 110.0),
            reading(5, 0, 1, 999.0),
            reading(3, 0, 2, 90.0),
        ];
        store.write_readings(&readings, WriteMode::InsertOrSkip).unwrap();

        let values = store
            .load_daily_values(HistoryMetric::DailyTotal, day(5), Some(3))
            .unwrap();
        assert_eq!(
            values,
            vec![
                DailyValue { turbine_id: 1, date: day(2), value: 110.0 },
                DailyValue { turbine_id: 2, date: day(3), value: 90.0 },
            ]
        );

        let all = store.load_daily_values(HistoryMetric::DailyTotal, day(5), None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].value, 100.0);
    }

    #[test]
    fn test_daily_means_come_from_summaries() {
        let mut store = MemoryStore::new();
        store
            .write_daily_summaries(
                &[summary(1, 1, 10.0), summary(2, 1, 20.0), summary(3, 1, 30.0)],
                WriteMode::InsertOrSkip,
            )
            .unwrap();
        let values = store
            .load_daily_values(HistoryMetric::DailyMean, day(3), Some(7))
            .unwrap();
        let means: Vec<f64> = values.iter().map(|v| v.value).collect();
        assert_eq!(means, vec![10.0, 20.0]);
    }
}
