use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{FlamesError, Result};

/// Top-level configuration structure for the application.
///
/// Every section falls back to its defaults when omitted, so an empty JSON
/// object is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub performance: PerformanceConfig,
    pub probe: ProbeConfig,
    pub reveal: RevealConfig,
}

impl AppConfig {
    /// Parses a configuration from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.performance.validate()?;
        self.probe.validate()?;
        self.reveal.validate()
    }
}

/// Tuning for the adaptive quality controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub target_fps: f64,
    /// Heap usage above which performance counts as low regardless of fps.
    pub memory_threshold_mb: f64,
    pub enable_auto_adjust: bool,
    /// Number of measurement windows that must pass between two automatic
    /// quality adjustments.
    pub min_frames_for_adjustment: u32,
    pub window_ms: u64,
    /// Number of per-window fps samples averaged together.
    pub history_len: usize,
    /// Fraction of `target_fps` below which performance is low.
    pub low_fps_ratio: f64,
    /// Fraction of `target_fps` the average must exceed before stepping up.
    pub recovery_fps_ratio: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            memory_threshold_mb: 100.0,
            enable_auto_adjust: true,
            min_frames_for_adjustment: 3,
            window_ms: 1000,
            history_len: 10,
            low_fps_ratio: 0.8,
            recovery_fps_ratio: 0.95,
        }
    }
}

impl PerformanceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(FlamesError::InvalidConfig(format!(
                "target_fps must be positive, got {}",
                self.target_fps
            )));
        }
        if self.window_ms == 0 {
            return Err(FlamesError::InvalidConfig(
                "window_ms must be at least 1".to_string(),
            ));
        }
        if self.history_len == 0 {
            return Err(FlamesError::InvalidConfig(
                "history_len must be at least 1".to_string(),
            ));
        }
        if self.low_fps_ratio > self.recovery_fps_ratio {
            return Err(FlamesError::InvalidConfig(format!(
                "low_fps_ratio ({}) exceeds recovery_fps_ratio ({})",
                self.low_fps_ratio, self.recovery_fps_ratio
            )));
        }
        Ok(())
    }
}

/// Thresholds used by the device capability probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Delay between an orientation change and the resample, letting the
    /// viewport dimensions settle.
    pub orientation_settle_ms: u64,
    pub low_memory_gb: f64,
    pub low_battery_level: f64,
    /// Memory reported when the host exposes no device-memory estimate.
    pub default_memory_gb: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            orientation_settle_ms: 100,
            low_memory_gb: 2.0,
            low_battery_level: 0.2,
            default_memory_gb: 4.0,
        }
    }
}

impl ProbeConfig {
    pub fn orientation_settle(&self) -> Duration {
        Duration::from_millis(self.orientation_settle_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.low_battery_level) {
            return Err(FlamesError::InvalidConfig(format!(
                "low_battery_level must lie in 0..=1, got {}",
                self.low_battery_level
            )));
        }
        if self.default_memory_gb <= 0.0 {
            return Err(FlamesError::InvalidConfig(
                "default_memory_gb must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Declarative reveal timeline: stage names with their start offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    pub stages: Vec<String>,
    pub delays_ms: Vec<u64>,
    pub should_animate: bool,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            stages: ["names", "letters", "elimination", "result", "celebration"]
                .into_iter()
                .map(String::from)
                .collect(),
            delays_ms: vec![0, 400, 900, 1600, 2200],
            should_animate: true,
        }
    }
}

impl RevealConfig {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.len() != self.delays_ms.len() {
            return Err(FlamesError::StageMismatch {
                stages: self.stages.len(),
                delays: self.delays_ms.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = AppConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config =
            AppConfig::from_json_str(r#"{ "performance": { "target_fps": 30.0 } }"#).unwrap();
        assert_eq!(config.performance.target_fps, 30.0);
        assert_eq!(config.performance.history_len, 10);
        assert_eq!(config.probe.orientation_settle_ms, 100);
    }

    #[test]
    fn rejects_non_positive_target_fps() {
        let err = AppConfig::from_json_str(r#"{ "performance": { "target_fps": 0.0 } }"#)
            .unwrap_err();
        assert!(matches!(err, FlamesError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_mismatched_reveal_table() {
        let json = r#"{ "reveal": { "stages": ["a", "b"], "delays_ms": [10] } }"#;
        let err = AppConfig::from_json_str(json).unwrap_err();
        assert!(matches!(
            err,
            FlamesError::StageMismatch {
                stages: 2,
                delays: 1
            }
        ));
    }

    #[test]
    fn reports_malformed_json() {
        let err = AppConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, FlamesError::Json(_)));
    }
}
