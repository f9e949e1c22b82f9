/// Aggregation and anomaly analysis over cleaned readings.
///
/// Submodules:
/// - `statistics`: mean, sample std, quantiles, and the daily summary.
/// - `baseline`: trailing-window historical baselines per turbine.
/// - `anomaly`: compares today's output against those baselines.

pub mod anomaly;
pub mod baseline;
pub mod statistics;
