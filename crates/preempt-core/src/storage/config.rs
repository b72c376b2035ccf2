//! TOML-based planner configuration.
//!
//! Sections:
//! - `[pomodoro]` focus quantum, breaks and minimum slice
//! - `[prediction]` boundary predictor tuning
//! - `[priority]` urgency weights
//! - `[horizon]` default schedule range
//!
//! Configuration is stored at `<data dir>/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::predictor::PredictorConfig;
use crate::priority::PriorityConfig;
use crate::scheduler::SchedulerConfig;

/// Pomodoro quantum configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PomodoroConfig {
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,
    #[serde(default = "default_short_break")]
    pub short_break_minutes: u32,
    #[serde(default = "default_long_break")]
    pub long_break_minutes: u32,
    #[serde(default = "default_quanta_before_long_break")]
    pub quanta_before_long_break: u32,
    #[serde(default = "default_min_slice")]
    pub min_slice_minutes: u32,
}

/// Boundary prediction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    #[serde(default = "default_spread_multiplier")]
    pub spread_multiplier: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    #[serde(default = "default_spread_minutes")]
    pub default_spread_minutes: u32,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: u32,
}

/// Urgency configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritySettings {
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    #[serde(default = "default_one")]
    pub baseline_weight: f64,
    #[serde(default = "default_deadline_weight")]
    pub deadline_weight: f64,
    #[serde(default = "default_one")]
    pub critical_ratio: f64,
}

/// Schedule range configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonConfig {
    #[serde(default = "default_horizon_days")]
    pub days: u32,
    /// Days resolved for deadline feasibility.
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,
}

/// Planner configuration.
///
/// Serialized to/from TOML at `<data dir>/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pomodoro: PomodoroConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub priority: PrioritySettings,
    #[serde(default)]
    pub horizon: HorizonConfig,
}

fn default_focus_minutes() -> u32 {
    25
}
fn default_short_break() -> u32 {
    5
}
fn default_long_break() -> u32 {
    15
}
fn default_quanta_before_long_break() -> u32 {
    4
}
fn default_min_slice() -> u32 {
    5
}
fn default_spread_multiplier() -> f64 {
    1.5
}
fn default_min_samples() -> u32 {
    5
}
fn default_spread_minutes() -> u32 {
    15
}
fn default_rolling_window() -> u32 {
    20
}
fn default_priority() -> u8 {
    5
}
fn default_one() -> f64 {
    1.0
}
fn default_deadline_weight() -> f64 {
    10.0
}
fn default_horizon_days() -> u32 {
    7
}
fn default_lookahead_days() -> u32 {
    28
}

impl Default for PomodoroConfig {
    fn default() -> Self {
        Self {
            focus_minutes: default_focus_minutes(),
            short_break_minutes: default_short_break(),
            long_break_minutes: default_long_break(),
            quanta_before_long_break: default_quanta_before_long_break(),
            min_slice_minutes: default_min_slice(),
        }
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            spread_multiplier: default_spread_multiplier(),
            min_samples: default_min_samples(),
            default_spread_minutes: default_spread_minutes(),
            rolling_window: default_rolling_window(),
        }
    }
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            default_priority: default_priority(),
            baseline_weight: default_one(),
            deadline_weight: default_deadline_weight(),
            critical_ratio: default_one(),
        }
    }
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            days: default_horizon_days(),
            lookahead_days: default_lookahead_days(),
        }
    }
}

impl From<&PomodoroConfig> for SchedulerConfig {
    fn from(c: &PomodoroConfig) -> Self {
        Self {
            focus_minutes: c.focus_minutes,
            short_break_minutes: c.short_break_minutes,
            long_break_minutes: c.long_break_minutes,
            quanta_before_long_break: c.quanta_before_long_break,
            min_slice_minutes: c.min_slice_minutes,
        }
    }
}

impl From<&PredictionConfig> for PredictorConfig {
    fn from(c: &PredictionConfig) -> Self {
        Self {
            spread_multiplier: c.spread_multiplier,
            min_samples: c.min_samples,
            default_spread_minutes: c.default_spread_minutes,
            rolling_window: c.rolling_window as usize,
        }
    }
}

impl From<&PrioritySettings> for PriorityConfig {
    fn from(c: &PrioritySettings) -> Self {
        Self {
            default_priority: c.default_priority.min(10),
            baseline_weight: c.baseline_weight,
            deadline_weight: c.deadline_weight,
            critical_ratio: c.critical_ratio,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(n) if n.is_f64() => value
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(serde_json::Value::Number)
                        .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as a whole number")))?,
                    serde_json::Value::Object(_) => return Err(unknown()),
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Path of the config file in the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from the data directory, writing defaults when the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config =
                    toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "using default configuration");
            Self::default()
        })
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Dotted keys of every leaf value.
    pub fn keys(&self) -> Vec<String> {
        let Ok(serde_json::Value::Object(sections)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        sections
            .iter()
            .flat_map(|(section, values)| {
                values
                    .as_object()
                    .into_iter()
                    .flat_map(move |fields| fields.keys().map(move |k| format!("{section}.{k}")))
            })
            .collect()
    }

    /// Update a value in memory. Unknown keys and mistyped values are rejected.
    pub fn update(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a value by key and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.update(key, value)?;
        self.save()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("pomodoro.focus_minutes", self.pomodoro.focus_minutes),
            ("pomodoro.quanta_before_long_break", self.pomodoro.quanta_before_long_break),
            ("pomodoro.min_slice_minutes", self.pomodoro.min_slice_minutes),
            ("horizon.days", self.horizon.days),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be positive".into(),
                });
            }
        }
        if self.priority.default_priority > 10 {
            return Err(ConfigError::InvalidValue {
                key: "priority.default_priority".into(),
                message: "must be between 0 and 10".into(),
            });
        }
        Ok(())
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig::from(&self.pomodoro)
    }

    pub fn predictor(&self) -> PredictorConfig {
        PredictorConfig::from(&self.prediction)
    }

    pub fn priority_config(&self) -> PriorityConfig {
        PriorityConfig::from(&self.priority)
    }
}
