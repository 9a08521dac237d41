//! Optical/telemetry alignment
//!
//! The optical and telemetry streams arrive at different rates and are
//! correlated by timestamp, never by index.

use crate::types::{sorted_by_time, OpticalSample, TelemetrySample};
use chrono::{DateTime, Utc};

/// Telemetry sample closest in time to `timestamp`; earlier wins ties
pub fn nearest_telemetry(
    timestamp: DateTime<Utc>,
    telemetry: &[TelemetrySample],
) -> Option<&TelemetrySample> {
    telemetry
        .iter()
        .min_by_key(|s| ((s.timestamp - timestamp).num_milliseconds().abs(), s.timestamp))
}

/// Telemetry window matching an optical batch
///
/// Returns up to `window_size` timestamp-ordered telemetry samples ending at
/// the sample nearest to the newest optical timestamp. Telemetry recorded
/// after that point is excluded.
pub fn telemetry_window_for(
    optical: &[OpticalSample],
    telemetry: &[TelemetrySample],
    window_size: usize,
) -> Vec<TelemetrySample> {
    let latest = match optical.iter().map(|s| s.timestamp).max() {
        Some(latest) => latest,
        None => return Vec::new(),
    };
    let anchor = match nearest_telemetry(latest, telemetry) {
        Some(anchor) => anchor.timestamp,
        None => return Vec::new(),
    };

    let sorted = sorted_by_time(telemetry, |s| s.timestamp);
    let end = sorted.partition_point(|s| s.timestamp <= anchor);
    let start = end.saturating_sub(window_size);
    sorted[start..end].to_vec()
}
