//! Telemetry summarization
//!
//! Reduces a recent window of auxiliary telemetry to the scalar features the
//! context classifier decides on:
//! - Movement variation (standard deviation of motion magnitude)
//! - Temperature delta (max - min)
//! - Charge state of the last sample

use crate::error::ComputeError;
use crate::stats;
use crate::types::{ChargeState, TelemetryFeatures, TelemetrySample};

/// Fewest telemetry samples a window may be summarized from
pub const MIN_TELEMETRY_SAMPLES: usize = 5;

/// Summarizer for telemetry windows
pub struct TelemetrySummarizer;

impl TelemetrySummarizer {
    /// Summarize a timestamp-sorted telemetry window
    ///
    /// `charge_threshold` is the percentage above which the device counts as
    /// charging.
    pub fn summarize(
        window: &[TelemetrySample],
        charge_threshold: f64,
    ) -> Result<TelemetryFeatures, ComputeError> {
        if window.len() < MIN_TELEMETRY_SAMPLES {
            return Err(ComputeError::InsufficientData {
                component: "telemetry summarizer",
                required: MIN_TELEMETRY_SAMPLES,
                actual: window.len(),
            });
        }

        let motion: Vec<f64> = window.iter().map(|s| s.motion_magnitude).collect();
        let temperature: Vec<f64> = window.iter().map(|s| s.temperature_celsius).collect();

        let movement_variation = stats::std_dev(&motion);
        let temperature_delta = stats::min_max(&temperature)
            .map(|(lo, hi)| hi - lo)
            .unwrap_or(0.0);

        let charge_level_percent = window
            .last()
            .map(|s| s.charge_level_percent)
            .unwrap_or(0.0);

        Ok(TelemetryFeatures {
            movement_variation,
            temperature_delta,
            charge_level_percent,
            charge_state: charge_state(charge_level_percent, charge_threshold),
            sample_count: window.len(),
        })
    }
}

fn charge_state(level: f64, threshold: f64) -> ChargeState {
    if level > threshold {
        ChargeState::ChargingLike
    } else {
        ChargeState::Discharging
    }
}
