use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::notifier::StatusPhase;
use crate::{
    ERROR_STATUS_MS, EVENT_CHANNEL_CAPACITY, INFO_STATUS_MS, MAX_HISTORY_ENTRIES, MAX_RADIUS,
    MIN_RADIUS, RECENT_ACTIVITY_WINDOW_SECS, RECORD_LABEL, SECONDARY_VALUE, SUCCESS_STATUS_MS,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Validation(String),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for the dashboard core. Every field has a default, so a shell
/// may pass a partial JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub success_status_ms: u64,
    pub error_status_ms: u64,
    pub info_status_ms: u64,
    pub history_capacity: usize,
    pub recent_window_secs: u64,
    pub record_label: String,
    pub secondary_value: u32,
    pub min_radius: u32,
    pub max_radius: u32,
    pub latitude_bounds: (i64, i64),
    pub longitude_bounds: (i64, i64),
    pub event_channel_capacity: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            success_status_ms: SUCCESS_STATUS_MS,
            error_status_ms: ERROR_STATUS_MS,
            info_status_ms: INFO_STATUS_MS,
            history_capacity: MAX_HISTORY_ENTRIES,
            recent_window_secs: RECENT_ACTIVITY_WINDOW_SECS,
            record_label: RECORD_LABEL.to_string(),
            secondary_value: SECONDARY_VALUE,
            min_radius: MIN_RADIUS,
            max_radius: MAX_RADIUS,
            latitude_bounds: (-90, 90),
            longitude_bounds: (-180, 180),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl DashboardConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.success_status_ms == 0 || self.error_status_ms == 0 || self.info_status_ms == 0 {
            return Err(ConfigError::Validation(
                "status durations must be > 0".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Validation("history_capacity must be > 0".into()));
        }
        if self.recent_window_secs == 0 {
            return Err(ConfigError::Validation("recent_window_secs must be > 0".into()));
        }
        if self.min_radius > self.max_radius {
            return Err(ConfigError::Validation(
                "min_radius must not exceed max_radius".into(),
            ));
        }
        if self.latitude_bounds.0 > self.latitude_bounds.1
            || self.longitude_bounds.0 > self.longitude_bounds.1
        {
            return Err(ConfigError::Validation("coordinate bounds are inverted".into()));
        }
        if self.record_label.trim().is_empty() {
            return Err(ConfigError::Validation("record_label cannot be empty".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "event_channel_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Auto-hide delay for a status phase. Pending stays until overwritten.
    #[must_use]
    pub const fn status_duration(&self, phase: StatusPhase) -> Option<Duration> {
        match phase {
            StatusPhase::Pending => None,
            StatusPhase::Success => Some(Duration::from_millis(self.success_status_ms)),
            StatusPhase::Error => Some(Duration::from_millis(self.error_status_ms)),
            StatusPhase::Info => Some(Duration::from_millis(self.info_status_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DashboardConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DashboardConfig::from_json_str(r#"{"success_status_ms": 1500}"#).unwrap();
        assert_eq!(config.success_status_ms, 1500);
        assert_eq!(config.error_status_ms, ERROR_STATUS_MS);
        assert_eq!(config.record_label, RECORD_LABEL);
    }

    #[test]
    fn rejects_inverted_radius() {
        let err = DashboardConfig::from_json_str(r#"{"min_radius": 500, "max_radius": 100}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn status_durations_follow_phase() {
        let config = DashboardConfig::default();
        assert_eq!(config.status_duration(StatusPhase::Pending), None);
        assert_eq!(
            config.status_duration(StatusPhase::Success),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(
            config.status_duration(StatusPhase::Error),
            Some(Duration::from_millis(3000))
        );
    }
}
