//! Baseline management
//!
//! This module owns the long-lived optical baseline: per-channel median levels
//! learned from a window of samples, scored by how tightly channel A clusters
//! around its median. The baseline survives across normalization calls and
//! is relearned only while the device context is stabilized, and then only
//! when no baseline exists, the current one is stale, or it is not yet
//! reliable. Each relearn derives from the full current window rather than
//! blending into the previous value.

use crate::config::BaselineConfig;
use crate::error::ComputeError;
use crate::stats;
use crate::types::{DeviceContext, OpticalSample};
use crate::{LUMEN_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Default age after which a baseline is stale (seconds)
pub const DEFAULT_STALE_AFTER_SECS: f64 = 300.0;

/// Learned per-channel reference levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineState {
    pub channel_a_baseline: f64,
    pub channel_b_baseline: f64,
    pub channel_c_baseline: f64,
    /// Timestamp of the newest sample the baseline was learned from
    pub timestamp: DateTime<Utc>,
    /// Confidence in the baseline (0-1)
    pub confidence: f64,
    pub sample_count: usize,
}

impl BaselineState {
    pub fn channels(&self) -> [f64; 3] {
        [
            self.channel_a_baseline,
            self.channel_b_baseline,
            self.channel_c_baseline,
        ]
    }

    /// Seconds between the baseline timestamp and `now`
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }

    /// Stale once older than the default 300 seconds
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age_secs(now) > DEFAULT_STALE_AFTER_SECS
    }

    /// Reliable with the default thresholds (confidence > 0.8, at least 20 samples)
    pub fn is_reliable(&self) -> bool {
        self.is_reliable_with(&BaselineConfig::default())
    }

    pub fn is_stale_with(&self, now: DateTime<Utc>, config: &BaselineConfig) -> bool {
        self.age_secs(now) > config.stale_after_secs
    }

    pub fn is_reliable_with(&self, config: &BaselineConfig) -> bool {
        self.confidence > config.reliable_confidence && self.sample_count >= config.min_samples
    }

    /// Reject restored values no estimator could have produced
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.channels().iter().any(|v| !v.is_finite()) {
            return Err(ComputeError::ParseError(
                "baseline channel levels must be finite".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ComputeError::ParseError(format!(
                "baseline confidence {} outside 0..=1",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Confidence-gated baseline estimator
#[derive(Debug, Clone, Default)]
pub struct BaselineEstimator {
    config: BaselineConfig,
    state: Option<BaselineState>,
}

impl BaselineEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BaselineConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    pub fn state(&self) -> Option<&BaselineState> {
        self.state.as_ref()
    }

    /// The baseline, if it is reliable enough to normalize against
    pub fn reliable_baseline(&self) -> Option<&BaselineState> {
        self.state
            .as_ref()
            .filter(|state| state.is_reliable_with(&self.config))
    }

    /// Whether a window observed at `now` under `context` should relearn the baseline
    pub fn should_update(&self, context: Option<&DeviceContext>, now: DateTime<Utc>) -> bool {
        let stabilized = context.map(|c| c.is_stabilized).unwrap_or(false);
        if !stabilized {
            return false;
        }
        match &self.state {
            None => true,
            Some(state) => {
                state.is_stale_with(now, &self.config) || !state.is_reliable_with(&self.config)
            }
        }
    }

    /// Relearn from `samples` if the update rule allows it
    ///
    /// Returns true when the baseline was replaced.
    pub fn update(&mut self, samples: &[OpticalSample], context: Option<&DeviceContext>) -> bool {
        let now = match samples.iter().map(|s| s.timestamp).max() {
            Some(now) => now,
            None => return false,
        };
        if !self.should_update(context, now) {
            return false;
        }

        match self.compute(samples) {
            Some(state) => {
                info!(
                    channel_a = state.channel_a_baseline,
                    confidence = state.confidence,
                    samples = state.sample_count,
                    "baseline learned"
                );
                self.state = Some(state);
                true
            }
            None => false,
        }
    }

    /// Median levels and confidence for a window; `None` when empty
    pub fn compute(&self, samples: &[OpticalSample]) -> Option<BaselineState> {
        let timestamp = samples.iter().map(|s| s.timestamp).max()?;

        let a: Vec<f64> = samples.iter().map(|s| s.channel_a).collect();
        let b: Vec<f64> = samples.iter().map(|s| s.channel_b).collect();
        let c: Vec<f64> = samples.iter().map(|s| s.channel_c).collect();

        let channel_a_baseline = stats::median(&a)?;
        Some(BaselineState {
            channel_a_baseline,
            channel_b_baseline: stats::median(&b)?,
            channel_c_baseline: stats::median(&c)?,
            timestamp,
            confidence: self.confidence(&a, channel_a_baseline),
            sample_count: samples.len(),
        })
    }

    /// `1 - cv / cv_full_scale`, clamped to 0..=1
    fn confidence(&self, values: &[f64], median: f64) -> f64 {
        let denominator = median.abs().max(self.config.epsilon);
        let cv = stats::std_dev(values) / denominator;
        (1.0 - cv / self.config.cv_full_scale).clamp(0.0, 1.0)
    }

    /// Install a previously persisted baseline
    pub fn restore(&mut self, state: BaselineState) -> Result<(), ComputeError> {
        state.validate()?;
        self.state = Some(state);
        Ok(())
    }

    pub fn reset(&mut self) {
        if self.state.take().is_some() {
            info!("baseline reset");
        }
    }

    pub fn diagnostics(
        &self,
        now: DateTime<Utc>,
        context: Option<DeviceContext>,
    ) -> BaselineDiagnostics {
        BaselineDiagnostics {
            baseline: self.state,
            age_secs: self.state.map(|s| s.age_secs(now)),
            is_stale: self
                .state
                .map(|s| s.is_stale_with(now, &self.config))
                .unwrap_or(false),
            is_reliable: self.reliable_baseline().is_some(),
            context,
        }
    }
}

/// Persisted form of a baseline for warm starts across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub producer: String,
    pub version: String,
    pub instance_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub baseline: BaselineState,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFormat {
    Envelope(BaselineSnapshot),
    Bare(BaselineState),
}

impl BaselineSnapshot {
    pub fn new(baseline: BaselineState, instance_id: Uuid) -> Self {
        Self {
            producer: PRODUCER_NAME.to_string(),
            version: LUMEN_VERSION.to_string(),
            instance_id,
            saved_at: Utc::now(),
            baseline,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse either a snapshot envelope or a bare baseline and validate it
    pub fn parse_baseline(json: &str) -> Result<BaselineState, ComputeError> {
        let baseline = match serde_json::from_str::<SnapshotFormat>(json)? {
            SnapshotFormat::Envelope(snapshot) => snapshot.baseline,
            SnapshotFormat::Bare(baseline) => baseline,
        };
        baseline.validate()?;
        Ok(baseline)
    }
}

/// Operator-facing summary of the baseline and cached context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineDiagnostics {
    pub baseline: Option<BaselineState>,
    pub age_secs: Option<f64>,
    pub is_stale: bool,
    pub is_reliable: bool,
    pub context: Option<DeviceContext>,
}

impl fmt::Display for BaselineDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.baseline {
            Some(b) => write!(
                f,
                "baseline A={:.1} B={:.1} C={:.1} confidence={:.2} samples={} age={:.0}s stale={} reliable={}",
                b.channel_a_baseline,
                b.channel_b_baseline,
                b.channel_c_baseline,
                b.confidence,
                b.sample_count,
                self.age_secs.unwrap_or(0.0),
                self.is_stale,
                self.is_reliable,
            )?,
            None => write!(f, "baseline none")?,
        }
        match &self.context {
            Some(c) => write!(
                f,
                "; context {} confidence={:.2} dwell={:.0}s stabilized={}",
                c.state.as_str(),
                c.confidence,
                c.dwell_time_secs,
                c.is_stabilized
            ),
            None => write!(f, "; context none"),
        }
    }
}
