use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::{CalendarId, CalendarStore, DEFAULT_MAX_SCAN_DAYS, DayId, Interval};
use crate::error::CalendarError;

pub const MAX_SCAN_DAYS_ENV: &str = "TASK_ENGINE_MAX_SCAN_DAYS";
pub const HTTP_ADDR_ENV: &str = "TASK_ENGINE_HTTP_ADDR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: &'static str, value: String },
    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Consecutive non-working days a calendar scan tolerates before giving up.
    pub max_scan_days: u32,
    /// Working hours that make up one day when work is shown in days.
    pub hours_per_day: u32,
    /// Intervals of the standard working day in the project calendar.
    pub default_work_intervals: Vec<Interval>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_scan_days: DEFAULT_MAX_SCAN_DAYS,
            hours_per_day: 8,
            default_work_intervals: vec![Interval::from_hours(9, 17)],
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = serde_json::from_str(&raw)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var(MAX_SCAN_DAYS_ENV) {
            self.max_scan_days = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: MAX_SCAN_DAYS_ENV,
                value,
            })?;
        }
        Ok(())
    }

    pub fn seconds_per_day(&self) -> i64 {
        i64::from(self.hours_per_day.max(1)) * 3600
    }

    /// A calendar store honouring the scan bound and standard intervals.
    pub fn calendar_store(&self) -> Result<CalendarStore, ConfigError> {
        let mut store = CalendarStore::new(self.max_scan_days);
        if self.default_work_intervals != [Interval::from_hours(9, 17)] {
            store.set_day_intervals(
                CalendarId::ROOT,
                DayId::WORK,
                self.default_work_intervals.clone(),
            )?;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "hours_per_day": 6 }"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.hours_per_day, 6);
        assert_eq!(config.default_work_intervals, vec![Interval::from_hours(9, 17)]);
    }

    #[test]
    fn custom_intervals_reach_the_root_calendar() {
        let config = EngineConfig {
            default_work_intervals: vec![Interval::from_hours(8, 12), Interval::from_hours(13, 17)],
            ..EngineConfig::default()
        };
        let store = config.calendar_store().unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(
            store.intervals_on(monday, CalendarId::ROOT).unwrap(),
            config.default_work_intervals
        );
    }
}
