/// Pipeline configuration.
///
/// Every tunable of the cleaning and anomaly stages lives here, with
/// defaults matching the fleet's operating assumptions (5-minute sample
/// cadence, 10-minute gap tolerance, 3σ outlier bounds, 2σ anomaly bounds
/// over a 7-day trailing window).
///
/// ## Loading order
///
/// 1. An explicit path (the CLI's `--config`)
/// 2. `TURBINE_CONFIG` environment variable
/// 3. `turbine_config.toml` in the current working directory
/// 4. Built-in defaults

use crate::error::{IngestError, Result};
use crate::groups::TurbineGroups;
use crate::model::{HistoryMetric, SensorField};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "TURBINE_CONFIG";

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "turbine_config.toml";

// ---------------------------------------------------------------------------
// Sensor limits
// ---------------------------------------------------------------------------

/// Physical range of a sensor channel. A missing bound is unbounded on
/// that side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorLimit {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl SensorLimit {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        SensorLimit { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Per-channel physical limits. Channels without an entry are not checked.
///
/// In TOML each channel is its own table, e.g.
/// `[cleaning.sensor_limits.wind_speed]`. Giving the table at all replaces
/// the defaults wholesale, so a config that lists only `wind_speed` checks
/// only `wind_speed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<SensorLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_direction: Option<SensorLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_output: Option<SensorLimit>,
}

impl SensorLimits {
    pub fn get(&self, field: SensorField) -> Option<SensorLimit> {
        match field {
            SensorField::WindSpeed => self.wind_speed,
            SensorField::WindDirection => self.wind_direction,
            SensorField::PowerOutput => self.power_output,
        }
    }

    pub fn with(mut self, field: SensorField, limit: SensorLimit) -> Self {
        let slot = match field {
            SensorField::WindSpeed => &mut self.wind_speed,
            SensorField::WindDirection => &mut self.wind_direction,
            SensorField::PowerOutput => &mut self.power_output,
        };
        *slot = Some(limit);
        self
    }

    /// Configured channels in canonical column order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorField, SensorLimit)> + '_ {
        SensorField::ALL
            .into_iter()
            .filter_map(move |field| self.get(field).map(|limit| (field, limit)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// wind_speed `[0, 100]`, wind_direction `[0, 360]`, power_output `[0, ∞)`.
pub fn default_sensor_limits() -> SensorLimits {
    SensorLimits::default()
        .with(SensorField::WindSpeed, SensorLimit::new(Some(0.0), Some(100.0)))
        .with(SensorField::WindDirection, SensorLimit::new(Some(0.0), Some(360.0)))
        .with(SensorField::PowerOutput, SensorLimit::new(Some(0.0), None))
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

/// Statistical outlier detector applied per turbine to `power_output`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OutlierDetector {
    /// `mean ± k·std` (sample std).
    Std { k: f64 },
    /// `[Q1 − f·IQR, Q3 + f·IQR]`.
    Iqr { factor: f64 },
}

impl Default for OutlierDetector {
    fn default() -> Self {
        OutlierDetector::Std { k: 3.0 }
    }
}

/// What happens to rows outside the outlier bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierAction {
    #[default]
    Drop,
    Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Expected spacing between samples of one turbine.
    pub sample_interval_minutes: u32,
    /// Longest gap forward-fill may bridge.
    pub max_fill_gap_minutes: u32,
    pub outlier_detector: OutlierDetector,
    pub outlier_action: OutlierAction,
    pub sensor_limits: SensorLimits,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        CleaningConfig {
            sample_interval_minutes: 5,
            max_fill_gap_minutes: 10,
            outlier_detector: OutlierDetector::default(),
            outlier_action: OutlierAction::default(),
            sensor_limits: default_sensor_limits(),
        }
    }
}

impl CleaningConfig {
    /// Maximum number of consecutive missing samples forward-fill repairs.
    pub fn fill_limit(&self) -> usize {
        if self.sample_interval_minutes == 0 {
            return 0;
        }
        (self.max_fill_gap_minutes / self.sample_interval_minutes) as usize
    }
}

// ---------------------------------------------------------------------------
// Anomaly detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Trailing window in days.
    pub window_days: Option<u32>,
    /// Ignore `window_days` and use every prior day.
    pub all_history: bool,
    pub sigma_threshold: f64,
    pub metric: HistoryMetric,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            window_days: Some(7),
            all_history: false,
            sigma_threshold: 2.0,
            metric: HistoryMetric::DailyTotal,
        }
    }
}

impl AnomalyConfig {
    /// History window handed to the baseline loader; `None` means unbounded.
    pub fn history_window(&self) -> Option<u32> {
        if self.all_history { None } else { self.window_days }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Used only when `DATABASE_URL` is not set.
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cleaning: CleaningConfig,
    pub anomaly: AnomalyConfig,
    pub database: DatabaseConfig,
    pub turbine_groups: TurbineGroups,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IngestError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolves the config source per the module-level loading order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(&PathBuf::from(path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        tracing::debug!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.cleaning;
        if c.sample_interval_minutes == 0 {
            return Err(IngestError::Config(
                "sample_interval_minutes must be positive".into(),
            ));
        }
        match c.outlier_detector {
            OutlierDetector::Std { k } if !(k >= 0.0) => {
                return Err(IngestError::Config(format!("outlier k must be >= 0, got {k}")));
            }
            OutlierDetector::Iqr { factor } if !(factor >= 0.0) => {
                return Err(IngestError::Config(format!(
                    "IQR factor must be >= 0, got {factor}"
                )));
            }
            _ => {}
        }
        for (field, limit) in c.sensor_limits.iter() {
            if let (Some(min), Some(max)) = (limit.min, limit.max) {
                if min > max {
                    return Err(IngestError::Config(format!(
                        "{field} limit is inverted: [{min}, {max}]"
                    )));
                }
            }
        }
        if !(self.anomaly.sigma_threshold >= 0.0) {
            return Err(IngestError::Config(format!(
                "sigma_threshold must be >= 0, got {}",
                self.anomaly.sigma_threshold
            )));
        }
        self.turbine_groups.validate()
    }

    /// `DATABASE_URL` (after loading `.env`) wins over the config file.
    pub fn database_url(&self) -> Result<String> {
        dotenv::dotenv().ok();
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.database.url.clone())
            .ok_or(IngestError::MissingDatabaseUrl)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
