//! Engine orchestration
//!
//! This module provides the public API for Synheart Lumen. A
//! `NormalizationEngine` is owned by the caller and holds the only mutable
//! state of the system: the persistent baseline, the cached device context,
//! and the transient segment cache. Calls on one engine must be serialized;
//! every update is a read-modify-write of those fields.
//!
//! Per batch the engine:
//! 1. Classifies the telemetry window (if any) into a `DeviceContext`
//! 2. Relearns the baseline when the context is stabilized and the update rule allows
//! 3. Resolves the requested method to a strategy
//! 4. Detects segments when the adaptive strategy runs
//! 5. Returns the normalized parallel array

use crate::align::telemetry_window_for;
use crate::baseline::{BaselineDiagnostics, BaselineEstimator, BaselineSnapshot, BaselineState};
use crate::config::EngineConfig;
use crate::context::DeviceContextClassifier;
use crate::error::ComputeError;
use crate::normalizer::{NormalizationMethod, Normalizer, StrategyInputs};
use crate::segments::SegmentDetector;
use crate::types::{sorted_by_time, DeviceContext, OpticalSample, Segment, TelemetrySample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of one normalization call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationResult {
    pub samples: Vec<OpticalSample>,
    pub requested: NormalizationMethod,
    /// Strategy that produced `samples` after selection and fallbacks
    pub applied: NormalizationMethod,
    pub context: Option<DeviceContext>,
    pub baseline_updated: bool,
}

/// Stateful normalization engine
pub struct NormalizationEngine {
    config: EngineConfig,
    instance_id: Uuid,
    classifier: DeviceContextClassifier,
    detector: SegmentDetector,
    baseline: BaselineEstimator,
    context: Option<DeviceContext>,
    segment_cache: Option<(Vec<OpticalSample>, Vec<Segment>)>,
    last_seen: Option<DateTime<Utc>>,
}

impl Default for NormalizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NormalizationEngine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Create an engine with a validated configuration
    pub fn with_config(config: EngineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        Self {
            classifier: DeviceContextClassifier::with_config(config.classifier.clone()),
            detector: SegmentDetector::with_config(config.segments.clone()),
            baseline: BaselineEstimator::with_config(config.baseline.clone()),
            config,
            instance_id: Uuid::new_v4(),
            context: None,
            segment_cache: None,
            last_seen: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Cached device context from the last successful classification
    pub fn context(&self) -> Option<&DeviceContext> {
        self.context.as_ref()
    }

    pub fn baseline(&self) -> Option<&BaselineState> {
        self.baseline.state()
    }

    /// Classify a telemetry window and cache the result
    ///
    /// Returns `None` for windows with fewer than five samples; the cached
    /// context is kept in that case.
    pub fn classify_context(&mut self, telemetry: &[TelemetrySample]) -> Option<DeviceContext> {
        let context = self.classifier.classify(telemetry)?;
        self.observe(context.observed_at);
        self.context = Some(context);
        Some(context)
    }

    /// Stability segments of an optical window, indexed in timestamp order
    pub fn detect_segments(&mut self, optical: &[OpticalSample]) -> Vec<Segment> {
        let sorted = sorted_by_time(optical, |s| s.timestamp);
        self.segments_for(&sorted)
    }

    fn segments_for(&mut self, sorted: &[OpticalSample]) -> Vec<Segment> {
        if sorted.is_empty() {
            return Vec::new();
        }
        if let Some((window, segments)) = &self.segment_cache {
            if window.as_slice() == sorted {
                return segments.clone();
            }
        }
        let segments = self.detector.detect(sorted);
        self.segment_cache = Some((sorted.to_vec(), segments.clone()));
        segments
    }

    /// Normalize an optical batch
    ///
    /// `telemetry` is the matching telemetry window; without it the cached
    /// context from earlier calls is used. A window too short to classify
    /// leaves the batch without context: no baseline update and a
    /// non-persistent strategy.
    pub fn normalize(
        &mut self,
        optical: &[OpticalSample],
        method: NormalizationMethod,
        telemetry: Option<&[TelemetrySample]>,
    ) -> Vec<OpticalSample> {
        self.normalize_detailed(optical, method, telemetry).samples
    }

    /// Normalize an optical batch against a longer telemetry stream
    ///
    /// The telemetry window is chosen by nearest-timestamp join.
    pub fn normalize_aligned(
        &mut self,
        optical: &[OpticalSample],
        method: NormalizationMethod,
        telemetry: &[TelemetrySample],
    ) -> NormalizationResult {
        let window = telemetry_window_for(optical, telemetry, self.config.classifier.window_size);
        let telemetry = if window.is_empty() {
            None
        } else {
            Some(window.as_slice())
        };
        self.normalize_detailed(optical, method, telemetry)
    }

    /// Normalize and report which strategy ran
    pub fn normalize_detailed(
        &mut self,
        optical: &[OpticalSample],
        method: NormalizationMethod,
        telemetry: Option<&[TelemetrySample]>,
    ) -> NormalizationResult {
        if optical.is_empty() {
            return NormalizationResult {
                samples: Vec::new(),
                requested: method,
                applied: method,
                context: self.context,
                baseline_updated: false,
            };
        }

        let sorted = sorted_by_time(optical, |s| s.timestamp);
        if let Some(last) = sorted.last() {
            self.observe(last.timestamp);
        }

        // A window too short to classify yields no context for this batch
        let context = match telemetry {
            Some(telemetry) => self.classify_context(telemetry),
            None => self.context,
        };
        let baseline_updated = self.baseline.update(&sorted, context.as_ref());
        let reliable = self.baseline.reliable_baseline().copied();

        let strategy = Normalizer::strategy_for(method, context.as_ref());
        let applied = strategy.effective_method(&StrategyInputs {
            config: &self.config.normalization,
            baseline: reliable.as_ref(),
            context: context.as_ref(),
            segments: &[],
        });

        let segments = if applied == NormalizationMethod::AdaptiveBaseline {
            self.segments_for(&sorted)
        } else {
            Vec::new()
        };

        let samples = if applied == NormalizationMethod::Raw {
            optical.to_vec()
        } else {
            let inputs = StrategyInputs {
                config: &self.config.normalization,
                baseline: reliable.as_ref(),
                context: context.as_ref(),
                segments: &segments,
            };
            strategy.apply(&sorted, &inputs)
        };

        debug!(
            requested = method.as_str(),
            applied = applied.as_str(),
            samples = samples.len(),
            baseline_updated,
            "normalized batch"
        );

        NormalizationResult {
            samples,
            requested: method,
            applied,
            context,
            baseline_updated,
        }
    }

    /// Discard the learned baseline
    pub fn reset_baseline(&mut self) {
        self.baseline.reset();
    }

    /// Session reset: baseline, context, dwell clock and caches
    pub fn reset(&mut self) {
        self.baseline.reset();
        self.classifier.reset();
        self.context = None;
        self.segment_cache = None;
        self.last_seen = None;
    }

    /// Structured diagnostics, ages measured against the newest sample seen
    pub fn diagnostics(&self) -> BaselineDiagnostics {
        let now = self.last_seen.unwrap_or_else(Utc::now);
        self.baseline.diagnostics(now, self.context)
    }

    /// One-line diagnostic summary for operator display
    pub fn baseline_diagnostics(&self) -> String {
        self.diagnostics().to_string()
    }

    /// Warm-start from a persisted snapshot
    ///
    /// Returns false and leaves the engine without a baseline if the snapshot
    /// cannot be parsed or holds invalid values.
    pub fn load_baseline_snapshot(&mut self, json: &str) -> bool {
        let restored = BaselineSnapshot::parse_baseline(json)
            .and_then(|state| self.baseline.restore(state));
        match restored {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "discarding baseline snapshot");
                self.baseline.reset();
                false
            }
        }
    }

    /// Persist the current baseline, if one exists
    pub fn save_baseline_snapshot(&self) -> Result<Option<String>, ComputeError> {
        match self.baseline.state() {
            Some(state) => {
                let json = BaselineSnapshot::new(*state, self.instance_id).to_json()?;
                Ok(Some(json))
            }
            None => Ok(None),
        }
    }

    fn observe(&mut self, timestamp: DateTime<Utc>) {
        self.last_seen = Some(match self.last_seen {
            Some(seen) => seen.max(timestamp),
            None => timestamp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceState;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn optical(offset_secs: i64, values: &[f64]) -> Vec<OpticalSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let ts = start()
                    + Duration::seconds(offset_secs)
                    + Duration::milliseconds(i as i64 * 40);
                OpticalSample::new(ts, v, v * 0.5, v * 0.25)
            })
            .collect()
    }

    fn charger_telemetry(offset_secs: i64) -> Vec<TelemetrySample> {
        (0..20)
            .map(|i| TelemetrySample {
                timestamp: start() + Duration::seconds(offset_secs + i),
                motion_magnitude: 0.0,
                temperature_celsius: 22.0,
                charge_level_percent: 98.0,
            })
            .collect()
    }

    fn skin_telemetry(offset_secs: i64) -> Vec<TelemetrySample> {
        (0..20)
            .map(|i| TelemetrySample {
                timestamp: start() + Duration::seconds(offset_secs + i),
                motion_magnitude: 0.02,
                temperature_celsius: 30.0 + i as f64 * 0.15,
                charge_level_percent: 60.0,
            })
            .collect()
    }

    fn reliable_baseline(level: f64, at: DateTime<Utc>) -> BaselineState {
        BaselineState {
            channel_a_baseline: level,
            channel_b_baseline: level * 0.5,
            channel_c_baseline: level * 0.25,
            timestamp: at,
            confidence: 0.95,
            sample_count: 40,
        }
    }

    const IR_WINDOW: [f64; 5] = [1000.0, 1100.0, 1200.0, 1050.0, 1300.0];

    #[test]
    fn test_classify_on_charger() {
        let mut engine = NormalizationEngine::new();
        let context = engine.classify_context(&charger_telemetry(0)).unwrap();

        assert_eq!(context.state, DeviceState::OnChargerStatic);
        assert!(context.confidence >= 0.9);
        assert_eq!(engine.context(), Some(&context));
    }

    #[test]
    fn test_persistent_smart_on_skin() {
        let mut engine = NormalizationEngine::new();
        let baseline = reliable_baseline(1100.0, start() + Duration::seconds(15));
        let json = serde_json::to_string(&baseline).unwrap();
        assert!(engine.load_baseline_snapshot(&json));

        let result = engine.normalize_detailed(
            &optical(19, &IR_WINDOW),
            NormalizationMethod::PersistentSmart,
            Some(&skin_telemetry(0)),
        );

        assert_eq!(result.applied, NormalizationMethod::PersistentSmart);
        assert_eq!(result.context.unwrap().state, DeviceState::OnSkinContact);
        assert!((result.samples[0].channel_a - 115.0).abs() < 1e-9);
        assert!(!result.baseline_updated);
    }

    #[test]
    fn test_persistent_mode_selects_by_stabilized_context() {
        let mut engine = NormalizationEngine::new();
        engine.load_baseline_snapshot(
            &serde_json::to_string(&reliable_baseline(1100.0, start() + Duration::seconds(60)))
                .unwrap(),
        );

        // Skin contact that has not dwelt long enough
        let first = engine.normalize_detailed(
            &optical(19, &IR_WINDOW),
            NormalizationMethod::Persistent,
            Some(&skin_telemetry(0)),
        );
        assert_eq!(first.applied, NormalizationMethod::DynamicRange);

        let second = engine.normalize_detailed(
            &optical(65, &IR_WINDOW),
            NormalizationMethod::Persistent,
            Some(&skin_telemetry(46)),
        );
        assert!(second.context.unwrap().is_stabilized);
        assert_eq!(second.applied, NormalizationMethod::PersistentSmart);
        assert!((second.samples[0].channel_a - 115.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_for_every_method() {
        let mut engine = NormalizationEngine::new();
        for method in NormalizationMethod::ALL {
            assert!(engine.normalize(&[], method, Some(&charger_telemetry(0))).is_empty());
            assert!(engine.normalize(&[], method, None).is_empty());
        }
    }

    #[test]
    fn test_short_unstable_window_is_one_segment() {
        let mut engine = NormalizationEngine::new();
        let segments = engine.detect_segments(&optical(0, &[0.0, 0.0, 5000.0, 0.0, 5000.0]));

        assert_eq!(segments.len(), 1);
        assert_eq!((segments[0].start_index, segments[0].end_index), (0, 5));
        assert!(!segments[0].is_stable);
    }

    #[test]
    fn test_raw_is_identity() {
        let mut engine = NormalizationEngine::new();
        let mut window = optical(0, &IR_WINDOW);
        window.swap(1, 3);
        assert_eq!(
            engine.normalize(&window, NormalizationMethod::Raw, Some(&charger_telemetry(0))),
            window
        );
    }

    #[test]
    fn test_baseline_learned_once_stabilized() {
        let mut engine = NormalizationEngine::new();
        let flat = vec![2000.0; 25];

        let first = engine.normalize_detailed(
            &optical(19, &flat),
            NormalizationMethod::Persistent,
            Some(&charger_telemetry(0)),
        );
        assert!(!first.baseline_updated);
        assert!(engine.baseline().is_none());

        let second = engine.normalize_detailed(
            &optical(31, &flat),
            NormalizationMethod::Persistent,
            Some(&charger_telemetry(12)),
        );
        assert!(second.baseline_updated);
        assert_eq!(second.applied, NormalizationMethod::AdaptiveBaseline);
        let baseline = engine.baseline().unwrap();
        assert_eq!(baseline.channel_a_baseline, 2000.0);
        assert_eq!(baseline.sample_count, 25);

        // Reliable and fresh: the next stabilized batch leaves it alone
        let third = engine.normalize_detailed(
            &optical(40, &vec![2500.0; 25]),
            NormalizationMethod::Persistent,
            Some(&charger_telemetry(21)),
        );
        assert!(!third.baseline_updated);
        assert_eq!(engine.baseline().unwrap().channel_a_baseline, 2000.0);
    }

    #[test]
    fn test_missing_telemetry_reuses_cached_context() {
        let mut engine = NormalizationEngine::new();
        engine.classify_context(&skin_telemetry(0));

        let result = engine.normalize_detailed(
            &optical(19, &IR_WINDOW),
            NormalizationMethod::DynamicRange,
            None,
        );
        assert_eq!(result.context.unwrap().state, DeviceState::OnSkinContact);
    }

    #[test]
    fn test_insufficient_telemetry_keeps_context() {
        let mut engine = NormalizationEngine::new();
        engine.classify_context(&charger_telemetry(0));
        assert!(engine.classify_context(&charger_telemetry(20)[..3]).is_none());
        assert_eq!(engine.context().unwrap().state, DeviceState::OnChargerStatic);
    }

    #[test]
    fn test_normalize_aligned_joins_by_timestamp() {
        let mut engine = NormalizationEngine::new();
        let mut telemetry = charger_telemetry(0);
        telemetry.extend(skin_telemetry(100));

        let result = engine.normalize_aligned(
            &optical(10, &IR_WINDOW),
            NormalizationMethod::Raw,
            &telemetry,
        );
        let context = result.context.unwrap();
        assert_eq!(context.state, DeviceState::OnChargerStatic);
        assert_eq!(context.observed_at, start() + Duration::seconds(10));
    }

    #[test]
    fn test_segment_cache_tracks_window() {
        let mut engine = NormalizationEngine::new();
        let window = optical(0, &vec![1000.0; 30]);
        let first = engine.detect_segments(&window);
        assert_eq!(engine.detect_segments(&window), first);

        let mut changed = window.clone();
        changed[15].channel_a = 20_000.0;
        let fresh = SegmentDetector::new().detect(&changed);
        assert_eq!(engine.detect_segments(&changed), fresh);
        assert_ne!(fresh, first);
    }

    #[test]
    fn test_adaptive_output_follows_interior_change() {
        let mut engine = NormalizationEngine::new();
        let window = optical(0, &vec![1000.0; 30]);
        engine.normalize(&window, NormalizationMethod::AdaptiveBaseline, None);

        let mut changed = window.clone();
        changed[15].channel_a = 20_000.0;
        let segments = SegmentDetector::new().detect(&changed);
        let expected = Normalizer::apply(
            NormalizationMethod::AdaptiveBaseline,
            &changed,
            &StrategyInputs {
                config: &engine.config().normalization,
                baseline: None,
                context: None,
                segments: &segments,
            },
        );
        assert_eq!(
            engine.normalize(&changed, NormalizationMethod::AdaptiveBaseline, None),
            expected
        );
    }

    #[test]
    fn test_short_telemetry_window_means_no_context() {
        let mut engine = NormalizationEngine::new();
        engine.normalize(
            &optical(19, &IR_WINDOW),
            NormalizationMethod::Raw,
            Some(&skin_telemetry(0)),
        );
        let stabilized = engine.classify_context(&skin_telemetry(46)).unwrap();
        assert!(stabilized.is_stabilized);

        let short = skin_telemetry(70);
        let result = engine.normalize_detailed(
            &optical(89, &vec![2000.0; 25]),
            NormalizationMethod::Persistent,
            Some(&short[..3]),
        );

        assert_eq!(result.context, None);
        assert!(!result.baseline_updated);
        assert!(engine.baseline().is_none());
        assert_eq!(result.applied, NormalizationMethod::DynamicRange);
        // The cached context survives for calls without telemetry
        assert!(engine.context().unwrap().is_stabilized);
    }

    #[test]
    fn test_snapshot_roundtrip_between_engines() {
        let mut engine = NormalizationEngine::new();
        engine.load_baseline_snapshot(
            &serde_json::to_string(&reliable_baseline(1234.5, start())).unwrap(),
        );
        let saved = engine.save_baseline_snapshot().unwrap().unwrap();

        let mut restored = NormalizationEngine::new();
        assert!(restored.load_baseline_snapshot(&saved));
        assert_eq!(restored.baseline(), engine.baseline());
    }

    #[test]
    fn test_corrupt_snapshot_means_no_baseline() {
        let mut engine = NormalizationEngine::new();
        engine.load_baseline_snapshot(
            &serde_json::to_string(&reliable_baseline(1100.0, start())).unwrap(),
        );

        assert!(!engine.load_baseline_snapshot("{\"channel_a_baseline\": \"oops\"}"));
        assert!(engine.baseline().is_none());
        assert_eq!(engine.save_baseline_snapshot().unwrap(), None);
    }

    #[test]
    fn test_reset_and_diagnostics() {
        let mut engine = NormalizationEngine::new();
        engine.load_baseline_snapshot(
            &serde_json::to_string(&reliable_baseline(1100.0, start())).unwrap(),
        );
        engine.classify_context(&charger_telemetry(0));

        let text = engine.baseline_diagnostics();
        assert!(text.contains("A=1100.0"));
        assert!(text.contains("age=19s"));
        assert!(text.contains("on_charger_static"));

        engine.reset_baseline();
        assert!(engine.baseline().is_none());
        assert!(engine.context().is_some());

        engine.reset();
        assert_eq!(engine.baseline_diagnostics(), "baseline none; context none");
    }

    #[test]
    fn test_with_config_rejects_invalid() {
        let mut config = EngineConfig::default();
        config.segments.window_size = 0;
        assert!(NormalizationEngine::with_config(config).is_err());
    }
}
