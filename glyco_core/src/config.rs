//! Configuration file support for glyco.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/glyco/config.toml`.

use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl DataConfig {
    /// Timeline file read when no input is given on the command line
    pub fn timeline_path(&self) -> PathBuf {
        self.data_dir.join("timeline.jsonl")
    }
}

/// Which instant a dose's activity window is measured against when deciding
/// to drop it from the insulin pool
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionClock {
    /// Dropped in the first step past one window since injection
    #[default]
    Injection,
    /// Dropped once the previous update already saw the window elapsed
    LastUpdate,
}

/// Model constants for one engine run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_insulin_activity_minutes")]
    pub insulin_activity_minutes: i64,

    /// Grams of carbohydrate absorbed per hour
    #[serde(default = "default_carbs_absorption_rate")]
    pub carbs_absorption_rate: f64,

    /// Grams covered by one insulin unit
    #[serde(default = "default_ratio")]
    pub default_ratio: f64,

    /// mg/dL per insulin unit
    #[serde(default = "default_sensitivity")]
    pub default_sensitivity: f64,

    /// mg/dL
    #[serde(default = "default_target")]
    pub default_target: f64,

    /// u/h granularity of basal recommendations
    #[serde(default = "default_basal_rounding")]
    pub basal_rounding: f64,

    /// Sensitivity used by the basal study, independent of schedules
    #[serde(default = "default_sensitivity")]
    pub reference_sensitivity: f64,

    #[serde(default)]
    pub eviction_clock: EvictionClock,

    /// Half-width (mg/dL) of the band around target judged correct
    #[serde(default = "default_correct_band")]
    pub correct_band: f64,

    /// IOB (u) and COB (g) below this count as no activity
    #[serde(default = "default_activity_threshold")]
    pub activity_threshold: f64,

    /// Relative gap between suggested and used parameter that gets flagged
    #[serde(default = "default_discrepancy_threshold")]
    pub discrepancy_threshold: f64,

    /// mg/dL below which glycemia is hypoglycemic
    #[serde(default = "default_range_low")]
    pub range_low: f64,

    /// mg/dL above which glycemia is hyperglycemic
    #[serde(default = "default_range_high")]
    pub range_high: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            insulin_activity_minutes: default_insulin_activity_minutes(),
            carbs_absorption_rate: default_carbs_absorption_rate(),
            default_ratio: default_ratio(),
            default_sensitivity: default_sensitivity(),
            default_target: default_target(),
            basal_rounding: default_basal_rounding(),
            reference_sensitivity: default_sensitivity(),
            eviction_clock: EvictionClock::default(),
            correct_band: default_correct_band(),
            activity_threshold: default_activity_threshold(),
            discrepancy_threshold: default_discrepancy_threshold(),
            range_low: default_range_low(),
            range_high: default_range_high(),
        }
    }
}

/// Longest accepted insulin activity window, one day
pub const MAX_INSULIN_ACTIVITY_MINUTES: i64 = 24 * 60;

impl ModelConfig {
    pub fn insulin_activity(&self) -> Duration {
        Duration::minutes(self.insulin_activity_minutes)
    }

    /// Carbohydrate absorption in grams per second
    pub fn carbs_rate_per_second(&self) -> f64 {
        self.carbs_absorption_rate / 3600.0
    }

    /// Check that every constant can be divided by or used as a rate
    pub fn validate(&self) -> Result<()> {
        if self.insulin_activity_minutes <= 0
            || self.insulin_activity_minutes > MAX_INSULIN_ACTIVITY_MINUTES
        {
            return Err(Error::Config(format!(
                "insulin_activity_minutes must be between 1 and {}, got {}",
                MAX_INSULIN_ACTIVITY_MINUTES, self.insulin_activity_minutes
            )));
        }

        let positive = [
            ("carbs_absorption_rate", self.carbs_absorption_rate),
            ("default_ratio", self.default_ratio),
            ("default_sensitivity", self.default_sensitivity),
            ("default_target", self.default_target),
            ("basal_rounding", self.basal_rounding),
            ("reference_sensitivity", self.reference_sensitivity),
            ("range_low", self.range_low),
            ("range_high", self.range_high),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("correct_band", self.correct_band),
            ("activity_threshold", self.activity_threshold),
            ("discrepancy_threshold", self.discrepancy_threshold),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Config(format!(
                    "{} must not be negative, got {}",
                    name, value
                )));
            }
        }

        if self.range_low >= self.range_high {
            return Err(Error::Config(format!(
                "range_low ({}) must be below range_high ({})",
                self.range_low, self.range_high
            )));
        }

        Ok(())
    }
}

/// Report configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Number of days covered by the daily report
    #[serde(default = "default_report_days")]
    pub days: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            days: default_report_days(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("glyco")
}

fn default_insulin_activity_minutes() -> i64 {
    120
}

fn default_carbs_absorption_rate() -> f64 {
    35.0
}

fn default_ratio() -> f64 {
    25.0
}

fn default_sensitivity() -> f64 {
    151.0
}

fn default_target() -> f64 {
    110.0
}

fn default_basal_rounding() -> f64 {
    0.05
}

fn default_correct_band() -> f64 {
    40.0
}

fn default_activity_threshold() -> f64 {
    0.1
}

fn default_discrepancy_threshold() -> f64 {
    0.25
}

fn default_range_low() -> f64 {
    70.0
}

fn default_range_high() -> f64 {
    180.0
}

fn default_report_days() -> u32 {
    5
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.model.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("glyco").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.insulin_activity(), Duration::hours(2));
        assert_eq!(config.model.carbs_absorption_rate, 35.0);
        assert_eq!(config.model.default_ratio, 25.0);
        assert_eq!(config.model.default_sensitivity, 151.0);
        assert_eq!(config.model.default_target, 110.0);
        assert_eq!(config.model.basal_rounding, 0.05);
        assert_eq!(config.model.eviction_clock, EvictionClock::Injection);
        assert_eq!(config.model.range_low, 70.0);
        assert_eq!(config.model.range_high, 180.0);
        assert_eq!(config.report.days, 5);
        assert!(config.model.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.model, parsed.model);
        assert_eq!(config.report.days, parsed.report.days);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[model]
default_ratio = 12.5
eviction_clock = "last_update"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.default_ratio, 12.5);
        assert_eq!(config.model.eviction_clock, EvictionClock::LastUpdate);
        assert_eq!(config.model.default_sensitivity, 151.0); // default
        assert_eq!(config.model.reference_sensitivity, 151.0); // default
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let model = ModelConfig {
            insulin_activity_minutes: 0,
            ..ModelConfig::default()
        };
        assert!(matches!(model.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_window() {
        let model = ModelConfig {
            insulin_activity_minutes: i64::MAX / 2,
            ..ModelConfig::default()
        };
        assert!(matches!(model.validate(), Err(Error::Config(_))));

        let day = ModelConfig {
            insulin_activity_minutes: MAX_INSULIN_ACTIVITY_MINUTES,
            ..ModelConfig::default()
        };
        assert!(day.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let model = ModelConfig {
            range_low: 180.0,
            range_high: 70.0,
            ..ModelConfig::default()
        };
        assert!(matches!(model.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_negative_rate() {
        let model = ModelConfig {
            carbs_absorption_rate: -35.0,
            ..ModelConfig::default()
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_load_from_rejects_invalid_model() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[model]\nbasal_rounding = 0.0\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.report.days = 3;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.report.days, 3);
    }
}
