//! Device context classification
//!
//! This module maps summarized telemetry onto a discrete device placement
//! (`DeviceState`), scores how consistently the window supports that
//! placement, and tracks how long the device has dwelt in it.
//!
//! A placement is trusted for baseline learning only once it is
//! *stabilized*: confidence at or above the configured minimum and dwell time
//! at or above the state's expected stabilization duration.
//!
//! Any classification that differs from the previous one counts as a
//! transition and resets dwell time, with no debounce. A single noisy window
//! is therefore enough to restart the stabilization clock.

use crate::config::ClassifierConfig;
use crate::telemetry::TelemetrySummarizer;
use crate::types::{
    sorted_by_time, ChargeState, DeviceContext, DeviceState, TelemetryFeatures, TelemetrySample,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Confidence reported when a window has too few pairs to score
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Stateful classifier; keeps the previous context to detect transitions
#[derive(Debug, Clone)]
pub struct DeviceContextClassifier {
    config: ClassifierConfig,
    previous: Option<DeviceContext>,
    state_since: Option<DateTime<Utc>>,
}

impl Default for DeviceContextClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceContextClassifier {
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            config,
            previous: None,
            state_since: None,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Last context produced by `classify`
    pub fn previous(&self) -> Option<&DeviceContext> {
        self.previous.as_ref()
    }

    /// Forget the previous state and dwell clock
    pub fn reset(&mut self) {
        self.previous = None;
        self.state_since = None;
    }

    /// Classify the most recent telemetry window.
    ///
    /// Input may be unsorted; the newest `window_size` samples are used.
    /// Returns `None` when fewer than five samples are available, in which
    /// case the previous context is left untouched.
    pub fn classify(&mut self, telemetry: &[TelemetrySample]) -> Option<DeviceContext> {
        let sorted = sorted_by_time(telemetry, |s| s.timestamp);
        let start = sorted.len().saturating_sub(self.config.window_size);
        let window = &sorted[start..];

        let features = match TelemetrySummarizer::summarize(window, self.config.charge_threshold) {
            Ok(features) => features,
            Err(e) => {
                debug!(error = %e, "skipping context classification");
                return None;
            }
        };
        let observed_at = window.last()?.timestamp;

        let state = self.classify_state(&features);
        let confidence = self.consistency_confidence(window, state);
        let dwell_time_secs = self.track_dwell(state, observed_at);

        let context = DeviceContext {
            state,
            confidence,
            dwell_time_secs,
            temperature_delta: features.temperature_delta,
            movement_variation: features.movement_variation,
            is_stabilized: is_stabilized(
                state,
                confidence,
                dwell_time_secs,
                self.config.min_confidence,
            ),
            observed_at,
        };
        self.previous = Some(context);
        Some(context)
    }

    /// Decision tree over the summarized features
    pub fn classify_state(&self, features: &TelemetryFeatures) -> DeviceState {
        let c = &self.config;
        let movement = features.movement_variation;
        let temp_delta = features.temperature_delta;

        if movement < c.low_movement && features.charge_state == ChargeState::ChargingLike {
            DeviceState::OnChargerStatic
        } else if movement < c.low_movement && temp_delta < c.low_temp_delta {
            DeviceState::OffChargerStatic
        } else if movement > c.moderate_movement {
            DeviceState::InMotion
        } else if temp_delta > c.moderate_temp_delta && movement < c.moderate_movement {
            DeviceState::OnSkinContact
        } else {
            DeviceState::Unknown
        }
    }

    /// Fraction of consecutive sample pairs consistent with `state`
    pub fn consistency_confidence(&self, window: &[TelemetrySample], state: DeviceState) -> f64 {
        if window.len() < 3 {
            return DEFAULT_CONFIDENCE;
        }

        let pairs = window.len() - 1;
        let consistent = window
            .windows(2)
            .filter(|pair| {
                let motion_delta = (pair[1].motion_magnitude - pair[0].motion_magnitude).abs();
                let temp_delta = (pair[1].temperature_celsius - pair[0].temperature_celsius).abs();
                self.pair_is_consistent(state, motion_delta, temp_delta)
            })
            .count();

        consistent as f64 / pairs as f64
    }

    fn pair_is_consistent(&self, state: DeviceState, motion_delta: f64, temp_delta: f64) -> bool {
        let c = &self.config;
        match state {
            DeviceState::OnChargerStatic | DeviceState::OffChargerStatic => {
                motion_delta < c.static_motion_delta && temp_delta < c.static_temp_delta
            }
            DeviceState::InMotion => motion_delta > c.motion_delta,
            DeviceState::OnSkinContact => motion_delta < c.skin_motion_delta,
            DeviceState::Unknown => true,
        }
    }

    fn track_dwell(&mut self, state: DeviceState, observed_at: DateTime<Utc>) -> f64 {
        let previous_state = self.previous.map(|p| p.state);
        match (previous_state, self.state_since) {
            (Some(prev), Some(since)) if prev == state => {
                ((observed_at - since).num_milliseconds() as f64 / 1000.0).max(0.0)
            }
            _ => {
                if let Some(prev) = previous_state {
                    debug!(from = prev.as_str(), to = state.as_str(), "device state transition");
                }
                self.state_since = Some(observed_at);
                0.0
            }
        }
    }
}

/// A state is stabilized once confident and held for its expected duration
pub fn is_stabilized(
    state: DeviceState,
    confidence: f64,
    dwell_time_secs: f64,
    min_confidence: f64,
) -> bool {
    confidence >= min_confidence && dwell_time_secs >= state.expected_stabilization_secs()
}
