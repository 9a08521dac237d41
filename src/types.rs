//! Core types for the Synheart Lumen engine
//!
//! This module defines the data structures that flow between the engine's
//! components: raw optical and telemetry samples, the device-placement state
//! machine, derived device context, and stability segments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One multi-channel light-intensity reading from the wearable's optical sensor
///
/// Channel A is the infrared channel on the reference hardware; B and C are
/// the red and green channels. Magnitudes are raw sensor units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticalSample {
    pub timestamp: DateTime<Utc>,
    pub channel_a: f64,
    pub channel_b: f64,
    pub channel_c: f64,
}

impl OpticalSample {
    pub fn new(timestamp: DateTime<Utc>, channel_a: f64, channel_b: f64, channel_c: f64) -> Self {
        Self {
            timestamp,
            channel_a,
            channel_b,
            channel_c,
        }
    }

    /// Channel values in A, B, C order
    pub fn channels(&self) -> [f64; 3] {
        [self.channel_a, self.channel_b, self.channel_c]
    }

    /// Same timestamp, new channel values
    pub fn with_channels(&self, channels: [f64; 3]) -> Self {
        Self {
            timestamp: self.timestamp,
            channel_a: channels[0],
            channel_b: channels[1],
            channel_c: channels[2],
        }
    }
}

/// Auxiliary telemetry used to infer device placement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    /// Accelerometer magnitude (g)
    pub motion_magnitude: f64,
    /// Surface temperature (celsius)
    pub temperature_celsius: f64,
    /// Battery charge level (0-100)
    pub charge_level_percent: f64,
}

/// Returns a copy of `samples` ordered by timestamp.
///
/// The sort is stable, so duplicate timestamps keep their arrival order.
pub fn sorted_by_time<T: Clone>(samples: &[T], timestamp: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| timestamp(s));
    sorted
}

/// Physical placement of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    OnChargerStatic,
    OffChargerStatic,
    InMotion,
    OnSkinContact,
    Unknown,
}

impl DeviceState {
    pub const ALL: [DeviceState; 5] = [
        DeviceState::OnChargerStatic,
        DeviceState::OffChargerStatic,
        DeviceState::InMotion,
        DeviceState::OnSkinContact,
        DeviceState::Unknown,
    ];

    /// Seconds the state must persist before it is trusted for baseline learning
    pub fn expected_stabilization_secs(&self) -> f64 {
        match self {
            DeviceState::OnChargerStatic => 10.0,
            DeviceState::OffChargerStatic => 15.0,
            DeviceState::InMotion => 30.0,
            DeviceState::OnSkinContact => 45.0,
            DeviceState::Unknown => 25.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::OnChargerStatic => "on_charger_static",
            DeviceState::OffChargerStatic => "off_charger_static",
            DeviceState::InMotion => "in_motion",
            DeviceState::OnSkinContact => "on_skin_contact",
            DeviceState::Unknown => "unknown",
        }
    }
}

/// Charge classification of the latest telemetry sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    /// Charge level above the charging threshold
    ChargingLike,
    Discharging,
}

/// Scalar features summarizing a telemetry window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFeatures {
    /// Population standard deviation of motion magnitude
    pub movement_variation: f64,
    /// Max minus min temperature
    pub temperature_delta: f64,
    /// Charge level of the last sample
    pub charge_level_percent: f64,
    pub charge_state: ChargeState,
    pub sample_count: usize,
}

/// Device placement context derived from the latest telemetry window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub state: DeviceState,
    /// Classification consistency across the window (0-1)
    pub confidence: f64,
    /// Seconds spent in `state` since the last transition
    pub dwell_time_secs: f64,
    pub temperature_delta: f64,
    pub movement_variation: f64,
    pub is_stabilized: bool,
    /// Timestamp of the newest telemetry sample the context was derived from
    pub observed_at: DateTime<Utc>,
}

impl DeviceContext {
    pub fn is_on_skin(&self) -> bool {
        self.state == DeviceState::OnSkinContact
    }
}

/// Contiguous stable or unstable run of an optical window
///
/// `end_index` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_index: usize,
    pub end_index: usize,
    pub is_stable: bool,
    pub average_variation: f64,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index < self.end_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stabilization_durations() {
        let durations: Vec<f64> = DeviceState::ALL
            .iter()
            .map(|s| s.expected_stabilization_secs())
            .collect();
        assert_eq!(durations, vec![10.0, 15.0, 30.0, 45.0, 25.0]);
    }

    #[test]
    fn test_device_state_serde_names() {
        let json = serde_json::to_string(&DeviceState::OnSkinContact).unwrap();
        assert_eq!(json, "\"on_skin_contact\"");
        for state in DeviceState::ALL {
            let encoded = serde_json::to_string(&state).unwrap();
            assert_eq!(encoded, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_sorted_by_time_is_stable() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(1);
        let samples = vec![
            OpticalSample::new(t1, 3.0, 0.0, 0.0),
            OpticalSample::new(t0, 1.0, 0.0, 0.0),
            OpticalSample::new(t1, 4.0, 0.0, 0.0),
            OpticalSample::new(t0, 2.0, 0.0, 0.0),
        ];

        let sorted = sorted_by_time(&samples, |s| s.timestamp);
        let values: Vec<f64> = sorted.iter().map(|s| s.channel_a).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_segment_bounds() {
        let segment = Segment {
            start_index: 2,
            end_index: 7,
            is_stable: true,
            average_variation: 0.0,
        };
        assert_eq!(segment.len(), 5);
        assert!(segment.contains(2));
        assert!(segment.contains(6));
        assert!(!segment.contains(7));
    }
}
