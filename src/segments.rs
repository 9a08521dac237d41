//! Stability segment detection
//!
//! Partitions an optical window into contiguous segments using local variance
//! alone, without consulting device telemetry. A fixed-size window slides
//! across the series; its variation is the largest per-channel standard
//! deviation. Movement (variation above the threshold) closes the open
//! segment at the window start and skips ahead by the stability duration so
//! the signal can settle; a quiet final window closes the segment at the end
//! of the series. Segments shorter than the stability duration are dropped.

use crate::config::SegmentConfig;
use crate::stats;
use crate::types::{OpticalSample, Segment};
use tracing::debug;

/// Variance-based segmenter for timestamp-ordered optical windows
#[derive(Debug, Clone, Default)]
pub struct SegmentDetector {
    config: SegmentConfig,
}

impl SegmentDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SegmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Detect segments in a timestamp-ordered window
    ///
    /// Indices refer to positions in `samples`. Windows shorter than the
    /// sliding window yield no segments.
    pub fn detect(&self, samples: &[OpticalSample]) -> Vec<Segment> {
        let window = self.config.window_size.max(1);
        let settle = self.config.min_stable_len.max(1);
        let n = samples.len();

        let mut segments = Vec::new();
        if n < window.max(settle) {
            return segments;
        }

        let mut segment_start = 0;
        let mut i = 0;
        let mut closed_at_end = false;

        while i + window <= n {
            let variation = window_variation(&samples[i..i + window]);
            let moving = variation > self.config.movement_threshold;

            if i + window == n {
                // Movement in the final window ends the segment at its start,
                // unless the open segment is that window alone
                let end = if moving && i > segment_start { i } else { n };
                self.close_segment(samples, segment_start, end, &mut segments);
                closed_at_end = true;
                break;
            }

            if moving {
                self.close_segment(samples, segment_start, i, &mut segments);
                i += settle;
                segment_start = i;
            } else {
                i += 1;
            }
        }

        // A settle skip can jump past the last full window
        if !closed_at_end && segment_start < n {
            self.close_segment(samples, segment_start, n, &mut segments);
        }

        debug!(samples = n, segments = segments.len(), "segment detection");
        segments
    }

    fn close_segment(
        &self,
        samples: &[OpticalSample],
        start: usize,
        end: usize,
        segments: &mut Vec<Segment>,
    ) {
        if end <= start || end - start < self.config.min_stable_len {
            return;
        }

        let span = &samples[start..end];
        let window = self.config.window_size.max(1);
        let average_variation = if span.len() < window {
            window_variation(span)
        } else {
            let variations: Vec<f64> = span.windows(window).map(window_variation).collect();
            stats::mean(&variations)
        };

        segments.push(Segment {
            start_index: start,
            end_index: end,
            is_stable: average_variation < self.config.movement_threshold / 2.0,
            average_variation,
        });
    }
}

/// Largest per-channel population standard deviation of a window
pub fn window_variation(window: &[OpticalSample]) -> f64 {
    let a: Vec<f64> = window.iter().map(|s| s.channel_a).collect();
    let b: Vec<f64> = window.iter().map(|s| s.channel_b).collect();
    let c: Vec<f64> = window.iter().map(|s| s.channel_c).collect();
    stats::std_dev(&a)
        .max(stats::std_dev(&b))
        .max(stats::std_dev(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_samples(values: &[f64]) -> Vec<OpticalSample> {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let ts = start + Duration::milliseconds(i as i64 * 40);
                OpticalSample::new(ts, v, v / 2.0, v / 4.0)
            })
            .collect()
    }

    #[test]
    fn test_short_window_has_no_segments() {
        let detector = SegmentDetector::new();
        assert!(detector.detect(&make_samples(&[1000.0; 4])).is_empty());
        assert!(detector.detect(&[]).is_empty());
    }

    #[test]
    fn test_flat_series_is_one_stable_segment() {
        let detector = SegmentDetector::new();
        let segments = detector.detect(&make_samples(&[1000.0; 30]));

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_index, 0);
        assert_eq!(segments[0].end_index, 30);
        assert!(segments[0].is_stable);
        assert_eq!(segments[0].average_variation, 0.0);
    }

    #[test]
    fn test_unstable_five_sample_window() {
        let detector = SegmentDetector::new();
        let segments = detector.detect(&make_samples(&[0.0, 0.0, 5000.0, 0.0, 5000.0]));

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_index, 0);
        assert_eq!(segments[0].end_index, 5);
        assert!(!segments[0].is_stable);
        assert!(segments[0].average_variation > 1000.0);
    }

    #[test]
    fn test_spike_splits_and_settles() {
        let mut values = vec![1000.0; 40];
        values[20] = 10_000.0;
        let detector = SegmentDetector::new();
        let segments = detector.detect(&make_samples(&values));

        assert_eq!(segments.len(), 2);
        assert_eq!((segments[0].start_index, segments[0].end_index), (0, 16));
        assert_eq!((segments[1].start_index, segments[1].end_index), (21, 40));
        assert!(segments.iter().all(|s| s.is_stable));
    }

    #[test]
    fn test_spike_in_final_window_splits() {
        let mut values = vec![1000.0; 30];
        values[29] = 100_000.0;
        let detector = SegmentDetector::new();
        let segments = detector.detect(&make_samples(&values));

        assert_eq!(segments.len(), 1);
        assert_eq!((segments[0].start_index, segments[0].end_index), (0, 25));
        assert!(segments[0].is_stable);
    }

    #[test]
    fn test_movement_at_start_drops_empty_segment() {
        let mut values = vec![1000.0; 20];
        values[0] = 9000.0;
        let detector = SegmentDetector::new();
        let segments = detector.detect(&make_samples(&values));

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_index, 5);
        assert_eq!(segments[0].end_index, 20);
    }

    #[test]
    fn test_segments_respect_minimum_length() {
        let values: Vec<f64> = (0..60)
            .map(|i| if i % 7 == 0 { 8000.0 } else { 1000.0 })
            .collect();
        let detector = SegmentDetector::new();
        for segment in detector.detect(&make_samples(&values)) {
            assert!(segment.len() >= detector.config().min_stable_len);
        }
    }

    #[test]
    fn test_window_variation_takes_max_channel() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let window: Vec<OpticalSample> = (0..4)
            .map(|i| OpticalSample::new(start, 10.0, if i % 2 == 0 { 0.0 } else { 4.0 }, 1.0))
            .collect();
        assert!((window_variation(&window) - 2.0).abs() < 1e-12);
    }
}
