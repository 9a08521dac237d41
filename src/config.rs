//! Engine configuration
//!
//! Every threshold in the engine is a sensor-calibration constant rather than
//! an algorithmic invariant, so all of them live here with their defaults.
//! Configurations deserialize from JSON with any field omitted falling back
//! to the default.

use crate::error::ComputeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Thresholds for the device context classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Movement variation below which the device is considered static
    pub low_movement: f64,
    /// Movement variation above which the device is in motion
    pub moderate_movement: f64,
    /// Temperature delta below which temperature is considered flat (celsius)
    pub low_temp_delta: f64,
    /// Temperature delta above which skin contact is assumed (celsius)
    pub moderate_temp_delta: f64,
    /// Charge level above which the device is treated as on the charger (percent)
    pub charge_threshold: f64,
    /// Confidence required for a state to count as stabilized
    pub min_confidence: f64,
    /// Per-pair motion delta limit for the static states
    pub static_motion_delta: f64,
    /// Per-pair temperature delta limit for the static states
    pub static_temp_delta: f64,
    /// Per-pair motion delta a moving device must exceed
    pub motion_delta: f64,
    /// Per-pair motion delta limit while on skin
    pub skin_motion_delta: f64,
    /// Number of most recent telemetry samples summarized per update
    pub window_size: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            low_movement: 0.1,
            moderate_movement: 0.5,
            low_temp_delta: 0.5,
            moderate_temp_delta: 2.0,
            charge_threshold: 95.0,
            min_confidence: 0.7,
            static_motion_delta: 0.05,
            static_temp_delta: 0.1,
            motion_delta: 0.2,
            skin_motion_delta: 0.3,
            window_size: 20,
        }
    }
}

/// Segment detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Sliding window length (samples)
    pub window_size: usize,
    /// Shortest segment emitted, also the settle skip after movement (samples)
    pub min_stable_len: usize,
    /// Channel standard deviation that counts as movement (raw sensor units)
    pub movement_threshold: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            min_stable_len: 5,
            movement_threshold: 1000.0,
        }
    }
}

/// Baseline estimator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Age after which a baseline is stale (seconds)
    pub stale_after_secs: f64,
    /// Confidence a baseline must exceed to be reliable
    pub reliable_confidence: f64,
    /// Samples a baseline must be learned from to be reliable
    pub min_samples: usize,
    /// Coefficient of variation at which confidence reaches zero
    pub cv_full_scale: f64,
    /// Floor applied to the median before dividing
    pub epsilon: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300.0,
            reliable_confidence: 0.8,
            min_samples: 20,
            cv_full_scale: 0.2,
            epsilon: 1e-9,
        }
    }
}

/// Output scaling for the normalization strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub adaptive_max_window: usize,
    pub adaptive_scale: f64,
    pub adaptive_center: f64,

    pub lower_percentile: f64,
    pub upper_percentile: f64,
    pub range_min: f64,
    pub range_max: f64,

    pub hr_center: f64,
    pub hr_spread: f64,
    pub hr_min: f64,
    pub hr_max: f64,

    pub persistent_center: f64,
    pub skin_scale: f64,
    pub default_scale: f64,

    /// Spans at or below this are degenerate
    pub epsilon: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            adaptive_max_window: 10,
            adaptive_scale: 0.1,
            adaptive_center: 100.0,
            lower_percentile: 10.0,
            upper_percentile: 90.0,
            range_min: 50.0,
            range_max: 150.0,
            hr_center: 120.0,
            hr_spread: 30.0,
            hr_min: 60.0,
            hr_max: 180.0,
            persistent_center: 120.0,
            skin_scale: 0.05,
            default_scale: 0.1,
            epsilon: 1e-9,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub segments: SegmentConfig,
    pub baseline: BaselineConfig,
    pub normalization: NormalizationConfig,
}

impl EngineConfig {
    /// Parse configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ComputeError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject configurations the algorithms cannot run with
    pub fn validate(&self) -> Result<(), ComputeError> {
        if let Some((name, _)) = self.thresholds().into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(invalid(&format!("{name} must be finite")));
        }

        let c = &self.classifier;
        if c.low_movement >= c.moderate_movement {
            return Err(invalid("classifier.low_movement must be below moderate_movement"));
        }
        if c.low_temp_delta >= c.moderate_temp_delta {
            return Err(invalid("classifier.low_temp_delta must be below moderate_temp_delta"));
        }
        if !(0.0..=1.0).contains(&c.min_confidence) {
            return Err(invalid("classifier.min_confidence must be within 0..=1"));
        }
        if c.window_size < crate::telemetry::MIN_TELEMETRY_SAMPLES {
            return Err(invalid(&format!(
                "classifier.window_size must be at least {}",
                crate::telemetry::MIN_TELEMETRY_SAMPLES
            )));
        }

        let s = &self.segments;
        if s.window_size == 0 || s.min_stable_len == 0 {
            return Err(invalid("segments.window_size and min_stable_len must be positive"));
        }
        if s.movement_threshold <= 0.0 {
            return Err(invalid("segments.movement_threshold must be positive"));
        }

        let b = &self.baseline;
        if !(0.0..=1.0).contains(&b.reliable_confidence) {
            return Err(invalid("baseline.reliable_confidence must be within 0..=1"));
        }
        if b.stale_after_secs <= 0.0 || b.cv_full_scale <= 0.0 || b.epsilon <= 0.0 {
            return Err(invalid(
                "baseline.stale_after_secs, cv_full_scale and epsilon must be positive",
            ));
        }

        let n = &self.normalization;
        if n.adaptive_max_window == 0 {
            return Err(invalid("normalization.adaptive_max_window must be positive"));
        }
        if n.lower_percentile >= n.upper_percentile
            || n.lower_percentile < 0.0
            || n.upper_percentile > 100.0
        {
            return Err(invalid("normalization percentiles must satisfy 0 <= lower < upper <= 100"));
        }
        if n.range_min >= n.range_max || n.hr_min >= n.hr_max {
            return Err(invalid("normalization output ranges must be ascending"));
        }
        Ok(())
    }

    fn thresholds(&self) -> [(&'static str, f64); 29] {
        let c = &self.classifier;
        let s = &self.segments;
        let b = &self.baseline;
        let n = &self.normalization;
        [
            ("classifier.low_movement", c.low_movement),
            ("classifier.moderate_movement", c.moderate_movement),
            ("classifier.low_temp_delta", c.low_temp_delta),
            ("classifier.moderate_temp_delta", c.moderate_temp_delta),
            ("classifier.charge_threshold", c.charge_threshold),
            ("classifier.min_confidence", c.min_confidence),
            ("classifier.static_motion_delta", c.static_motion_delta),
            ("classifier.static_temp_delta", c.static_temp_delta),
            ("classifier.motion_delta", c.motion_delta),
            ("classifier.skin_motion_delta", c.skin_motion_delta),
            ("segments.movement_threshold", s.movement_threshold),
            ("baseline.stale_after_secs", b.stale_after_secs),
            ("baseline.reliable_confidence", b.reliable_confidence),
            ("baseline.cv_full_scale", b.cv_full_scale),
            ("baseline.epsilon", b.epsilon),
            ("normalization.adaptive_scale", n.adaptive_scale),
            ("normalization.adaptive_center", n.adaptive_center),
            ("normalization.lower_percentile", n.lower_percentile),
            ("normalization.upper_percentile", n.upper_percentile),
            ("normalization.range_min", n.range_min),
            ("normalization.range_max", n.range_max),
            ("normalization.hr_center", n.hr_center),
            ("normalization.hr_spread", n.hr_spread),
            ("normalization.hr_min", n.hr_min),
            ("normalization.hr_max", n.hr_max),
            ("normalization.persistent_center", n.persistent_center),
            ("normalization.skin_scale", n.skin_scale),
            ("normalization.default_scale", n.default_scale),
            ("normalization.epsilon", n.epsilon),
        ]
    }
}

fn invalid(msg: &str) -> ComputeError {
    ComputeError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config =
            EngineConfig::from_json(r#"{"segments": {"movement_threshold": 250.0}}"#).unwrap();
        assert_eq!(config.segments.movement_threshold, 250.0);
        assert_eq!(config.segments.window_size, 5);
        assert_eq!(config.classifier, ClassifierConfig::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let json = r#"{"classifier": {"low_movement": 0.6, "moderate_movement": 0.5}}"#;
        let err = EngineConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidConfig(_)));

        let json = r#"{"normalization": {"lower_percentile": 90.0, "upper_percentile": 10.0}}"#;
        assert!(EngineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_non_finite_thresholds() {
        let mut config = EngineConfig::default();
        config.classifier.low_movement = f64::NAN;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("classifier.low_movement"));

        let mut config = EngineConfig::default();
        config.normalization.hr_max = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_reliable_confidence_out_of_range() {
        let json = r#"{"baseline": {"reliable_confidence": 1.5}}"#;
        assert!(EngineConfig::from_json(json).is_err());

        let mut config = EngineConfig::default();
        config.baseline.reliable_confidence = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_telemetry_window() {
        let json = r#"{"classifier": {"window_size": 3}}"#;
        assert!(EngineConfig::from_json(json).is_err());
    }
}
