//! Property-based checks for normalization invariants

use crate::baseline::{BaselineEstimator, BaselineState};
use crate::config::NormalizationConfig;
use crate::normalizer::{NormalizationMethod, NormalizationStrategy, Normalizer, StrategyInputs};
use crate::segments::SegmentDetector;
use crate::types::OpticalSample;
use crate::NormalizationEngine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
}

fn samples_from(points: &[(i64, f64, f64, f64)]) -> Vec<OpticalSample> {
    points
        .iter()
        .map(|&(ms, a, b, c)| OpticalSample::new(start() + Duration::milliseconds(ms), a, b, c))
        .collect()
}

fn arb_window(max_len: usize) -> impl Strategy<Value = Vec<OpticalSample>> {
    prop::collection::vec(
        (0i64..60_000, 0.0f64..100_000.0, 0.0f64..100_000.0, 0.0f64..100_000.0),
        0..max_len,
    )
    .prop_map(|points| samples_from(&points))
}

fn inputs(config: &NormalizationConfig) -> StrategyInputs<'_> {
    StrategyInputs {
        config,
        baseline: None,
        context: None,
        segments: &[],
    }
}

// =========================================================================
// Raw is the identity, in any order
// =========================================================================
proptest! {
    #[test]
    fn test_raw_is_identity(window in arb_window(64)) {
        let config = NormalizationConfig::default();
        let out = Normalizer::apply(NormalizationMethod::Raw, &window, &inputs(&config));
        prop_assert_eq!(&out, &window);

        let mut engine = NormalizationEngine::new();
        let out = engine.normalize(&window, NormalizationMethod::Raw, None);
        prop_assert_eq!(out, window);
    }
}

// =========================================================================
// Bounded strategy outputs
// =========================================================================
proptest! {
    #[test]
    fn test_heart_rate_simulation_stays_in_range(window in arb_window(64)) {
        let config = NormalizationConfig::default();
        let out = Normalizer::apply(
            NormalizationMethod::HeartRateSimulation,
            &window,
            &inputs(&config),
        );
        prop_assert_eq!(out.len(), window.len());
        for sample in &out {
            for value in sample.channels() {
                prop_assert!((60.0..=180.0).contains(&value), "value {} out of range", value);
            }
        }
    }

    #[test]
    fn test_dynamic_range_stays_in_range(window in arb_window(64)) {
        let config = NormalizationConfig::default();
        let out = Normalizer::apply(NormalizationMethod::DynamicRange, &window, &inputs(&config));
        for sample in &out {
            for value in sample.channels() {
                prop_assert!((50.0..=150.0).contains(&value), "value {} out of range", value);
            }
        }
    }

    #[test]
    fn test_every_method_preserves_length(window in arb_window(40)) {
        let mut engine = NormalizationEngine::new();
        for method in NormalizationMethod::ALL {
            prop_assert_eq!(engine.normalize(&window, method, None).len(), window.len());
        }
    }
}

// =========================================================================
// Segment shape
// =========================================================================
proptest! {
    #[test]
    fn test_segments_are_long_ordered_and_in_bounds(
        values in prop::collection::vec(0.0f64..10_000.0, 0..120)
    ) {
        let points: Vec<(i64, f64, f64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as i64 * 40, v, v, v))
            .collect();
        let window = samples_from(&points);
        let detector = SegmentDetector::new();
        let segments = detector.detect(&window);

        let mut previous_end = 0;
        for segment in &segments {
            prop_assert!(segment.len() >= detector.config().min_stable_len);
            prop_assert!(segment.end_index <= window.len());
            prop_assert!(segment.start_index >= previous_end);
            previous_end = segment.end_index;
        }
    }
}

// =========================================================================
// Baseline confidence and staleness
// =========================================================================
proptest! {
    #[test]
    fn test_confidence_falls_as_spread_grows(
        median in 500.0f64..5_000.0,
        narrow in 0.0f64..0.4,
        extra in 0.01f64..0.4,
    ) {
        // Spread stays below the full-scale CV so neither confidence clamps
        let wide = narrow + extra;
        let window = |spread: f64| {
            let points: Vec<(i64, f64, f64, f64)> = (0..21)
                .map(|i| {
                    let offset = match i % 3 {
                        0 => -spread,
                        1 => 0.0,
                        _ => spread,
                    };
                    let v = median + offset * median * 0.3;
                    (i as i64 * 40, v, v, v)
                })
                .collect();
            samples_from(&points)
        };

        let estimator = BaselineEstimator::new();
        let tight = estimator.compute(&window(narrow)).unwrap();
        let loose = estimator.compute(&window(wide)).unwrap();
        prop_assert!(tight.confidence > loose.confidence);
        prop_assert!((0.0..=1.0).contains(&loose.confidence));
    }

    #[test]
    fn test_stale_exactly_when_older_than_five_minutes(age_ms in 0i64..1_000_000) {
        let state = BaselineState {
            channel_a_baseline: 1000.0,
            channel_b_baseline: 500.0,
            channel_c_baseline: 250.0,
            timestamp: start(),
            confidence: 0.9,
            sample_count: 20,
        };
        let now = start() + Duration::milliseconds(age_ms);
        prop_assert_eq!(state.is_stale(now), age_ms > 300_000);
    }
}

#[test]
fn test_strategy_registry_covers_every_method() {
    for method in NormalizationMethod::ALL {
        let strategy: &dyn NormalizationStrategy = Normalizer::strategy_for(method, None);
        if method != NormalizationMethod::Persistent {
            assert_eq!(strategy.method(), method);
        }
    }
}
