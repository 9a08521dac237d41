//! Signal normalization
//!
//! This module turns a window of raw optical samples into display-scale
//! values. Each strategy is a pure function of its inputs and returns a
//! parallel array of the same length:
//! - Raw: identity
//! - Adaptive baseline: local mean subtraction, centered at 100
//! - Dynamic range: robust 10th/90th percentile min-max into 50..150
//! - Heart-rate simulation: z-score into a clamped 60..180 display band
//! - Persistent smart: subtraction of the learned baseline, centered at 120
//!
//! `Persistent` is not a strategy of its own: it selects one of the above
//! from the device context.

use crate::baseline::BaselineState;
use crate::config::NormalizationConfig;
use crate::stats;
use crate::types::{sorted_by_time, DeviceContext, OpticalSample, Segment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalization requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    Raw,
    AdaptiveBaseline,
    DynamicRange,
    HeartRateSimulation,
    PersistentSmart,
    /// Pick a strategy from the device context
    Persistent,
}

impl NormalizationMethod {
    pub const ALL: [NormalizationMethod; 6] = [
        NormalizationMethod::Raw,
        NormalizationMethod::AdaptiveBaseline,
        NormalizationMethod::DynamicRange,
        NormalizationMethod::HeartRateSimulation,
        NormalizationMethod::PersistentSmart,
        NormalizationMethod::Persistent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationMethod::Raw => "raw",
            NormalizationMethod::AdaptiveBaseline => "adaptive_baseline",
            NormalizationMethod::DynamicRange => "dynamic_range",
            NormalizationMethod::HeartRateSimulation => "heart_rate_simulation",
            NormalizationMethod::PersistentSmart => "persistent_smart",
            NormalizationMethod::Persistent => "persistent",
        }
    }
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown normalization method: {s}"))
    }
}

/// Everything a strategy may read besides the samples
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs<'a> {
    pub config: &'a NormalizationConfig,
    /// Baseline that passed the reliability check, if any
    pub baseline: Option<&'a BaselineState>,
    pub context: Option<&'a DeviceContext>,
    /// Stability segments of the same window
    pub segments: &'a [Segment],
}

/// One normalization strategy
pub trait NormalizationStrategy {
    fn method(&self) -> NormalizationMethod;

    /// Transform timestamp-ordered samples into a parallel array
    fn apply(&self, samples: &[OpticalSample], inputs: &StrategyInputs<'_>) -> Vec<OpticalSample>;

    /// Method that actually runs for these inputs, accounting for fallbacks
    fn effective_method(&self, _inputs: &StrategyInputs<'_>) -> NormalizationMethod {
        self.method()
    }
}

pub struct Raw;

impl NormalizationStrategy for Raw {
    fn method(&self) -> NormalizationMethod {
        NormalizationMethod::Raw
    }

    fn apply(&self, samples: &[OpticalSample], _inputs: &StrategyInputs<'_>) -> Vec<OpticalSample> {
        samples.to_vec()
    }
}

/// Local mean subtraction over a short sliding window
///
/// The window never crosses a segment boundary when the sample lies inside a
/// detected segment, so settling after movement does not bleed into stable
/// stretches.
pub struct AdaptiveBaseline;

impl AdaptiveBaseline {
    pub fn window_size(n: usize, max_window: usize) -> usize {
        max_window.min((n / 3).max(1))
    }

    fn local_range(index: usize, window: usize, n: usize, segments: &[Segment]) -> (usize, usize) {
        let (lo, hi) = segments
            .iter()
            .find(|s| s.contains(index))
            .map(|s| (s.start_index, s.end_index.min(n)))
            .unwrap_or((0, n));

        let mut start = index.saturating_sub(window / 2).max(lo);
        let end = (start + window).min(hi);
        if end - start < window {
            start = end.saturating_sub(window).max(lo);
        }
        (start, end)
    }
}

impl NormalizationStrategy for AdaptiveBaseline {
    fn method(&self) -> NormalizationMethod {
        NormalizationMethod::AdaptiveBaseline
    }

    fn apply(&self, samples: &[OpticalSample], inputs: &StrategyInputs<'_>) -> Vec<OpticalSample> {
        let n = samples.len();
        let window = Self::window_size(n, inputs.config.adaptive_max_window);
        let center = inputs.config.adaptive_center;
        let scale = inputs.config.adaptive_scale;

        (0..n)
            .map(|i| {
                let (start, end) = Self::local_range(i, window, n, inputs.segments);
                let local = &samples[start..end];
                let mut means = [0.0; 3];
                for sample in local {
                    for (mean, value) in means.iter_mut().zip(sample.channels()) {
                        *mean += value;
                    }
                }
                let count = local.len().max(1) as f64;
                let mut channels = samples[i].channels();
                for (value, mean) in channels.iter_mut().zip(means) {
                    *value = center + (*value - mean / count) * scale;
                }
                samples[i].with_channels(channels)
            })
            .collect()
    }
}

/// Robust min-max between two percentiles
pub struct DynamicRange;

impl NormalizationStrategy for DynamicRange {
    fn method(&self) -> NormalizationMethod {
        NormalizationMethod::DynamicRange
    }

    fn apply(&self, samples: &[OpticalSample], inputs: &StrategyInputs<'_>) -> Vec<OpticalSample> {
        let c = inputs.config;
        let midpoint = (c.range_min + c.range_max) / 2.0;
        let width = c.range_max - c.range_min;

        let ranges: Vec<Option<(f64, f64)>> = (0..3)
            .map(|channel| {
                let values = channel_values(samples, channel);
                let low = stats::percentile(&values, c.lower_percentile).unwrap_or(0.0);
                let high = stats::percentile(&values, c.upper_percentile).unwrap_or(0.0);
                stats::checked_span(low, high, c.epsilon)
                    .ok()
                    .map(|span| (low, span))
            })
            .collect();

        map_channels(samples, |channel, v| match ranges[channel] {
            Some((low, span)) => {
                (c.range_min + (v - low) / span * width).clamp(c.range_min, c.range_max)
            }
            None => midpoint,
        })
    }
}

/// Display-oriented z-score band; not a physiological measurement
pub struct HeartRateSimulation;

impl NormalizationStrategy for HeartRateSimulation {
    fn method(&self) -> NormalizationMethod {
        NormalizationMethod::HeartRateSimulation
    }

    fn apply(&self, samples: &[OpticalSample], inputs: &StrategyInputs<'_>) -> Vec<OpticalSample> {
        let c = inputs.config;
        let moments: Vec<Option<(f64, f64)>> = (0..3)
            .map(|channel| {
                let values = channel_values(samples, channel);
                let std = stats::std_dev(&values);
                stats::checked_span(0.0, std, c.epsilon)
                    .ok()
                    .map(|std| (stats::mean(&values), std))
            })
            .collect();

        map_channels(samples, |channel, v| match moments[channel] {
            Some((mean, std)) => {
                let rate = c.hr_center + (v - mean) / std * c.hr_spread;
                if rate.is_finite() {
                    rate.clamp(c.hr_min, c.hr_max)
                } else {
                    c.hr_center
                }
            }
            None => c.hr_center,
        })
    }
}

/// Subtraction of the persistent baseline; adaptive baseline without one
pub struct PersistentSmart;

impl NormalizationStrategy for PersistentSmart {
    fn method(&self) -> NormalizationMethod {
        NormalizationMethod::PersistentSmart
    }

    fn apply(&self, samples: &[OpticalSample], inputs: &StrategyInputs<'_>) -> Vec<OpticalSample> {
        let baseline = match inputs.baseline {
            Some(baseline) => baseline.channels(),
            None => return AdaptiveBaseline.apply(samples, inputs),
        };
        let c = inputs.config;
        let scale = if inputs.context.map(|ctx| ctx.is_on_skin()).unwrap_or(false) {
            c.skin_scale
        } else {
            c.default_scale
        };

        map_channels(samples, |channel, v| {
            c.persistent_center + (v - baseline[channel]) * scale
        })
    }

    fn effective_method(&self, inputs: &StrategyInputs<'_>) -> NormalizationMethod {
        if inputs.baseline.is_some() {
            NormalizationMethod::PersistentSmart
        } else {
            NormalizationMethod::AdaptiveBaseline
        }
    }
}

/// Strategy registry and context-driven selection
pub struct Normalizer;

impl Normalizer {
    /// Strategy choice for `Persistent` mode
    ///
    /// Stabilized skin contact uses the learned baseline, any other
    /// stabilized placement uses adaptive baseline, and everything else uses
    /// dynamic range.
    pub fn select_method(context: Option<&DeviceContext>) -> NormalizationMethod {
        match context {
            Some(c) if c.is_stabilized && c.is_on_skin() => NormalizationMethod::PersistentSmart,
            Some(c) if c.is_stabilized => NormalizationMethod::AdaptiveBaseline,
            _ => NormalizationMethod::DynamicRange,
        }
    }

    /// Strategy that runs for `method`; explicit methods bypass selection
    pub fn strategy_for(
        method: NormalizationMethod,
        context: Option<&DeviceContext>,
    ) -> &'static dyn NormalizationStrategy {
        match method {
            NormalizationMethod::Raw => &Raw,
            NormalizationMethod::AdaptiveBaseline => &AdaptiveBaseline,
            NormalizationMethod::DynamicRange => &DynamicRange,
            NormalizationMethod::HeartRateSimulation => &HeartRateSimulation,
            NormalizationMethod::PersistentSmart => &PersistentSmart,
            NormalizationMethod::Persistent => {
                Self::strategy_for(Self::select_method(context), context)
            }
        }
    }

    /// Normalize possibly unordered samples
    ///
    /// Raw returns the input untouched; every other method processes the
    /// samples in timestamp order.
    pub fn apply(
        method: NormalizationMethod,
        samples: &[OpticalSample],
        inputs: &StrategyInputs<'_>,
    ) -> Vec<OpticalSample> {
        if samples.is_empty() {
            return Vec::new();
        }
        let strategy = Self::strategy_for(method, inputs.context);
        if strategy.method() == NormalizationMethod::Raw {
            return strategy.apply(samples, inputs);
        }
        let sorted = sorted_by_time(samples, |s| s.timestamp);
        strategy.apply(&sorted, inputs)
    }
}

fn channel_values(samples: &[OpticalSample], channel: usize) -> Vec<f64> {
    samples.iter().map(|s| s.channels()[channel]).collect()
}

fn map_channels(samples: &[OpticalSample], f: impl Fn(usize, f64) -> f64) -> Vec<OpticalSample> {
    samples
        .iter()
        .map(|s| {
            let mut channels = s.channels();
            for (channel, value) in channels.iter_mut().enumerate() {
                *value = f(channel, *value);
            }
            s.with_channels(channels)
        })
        .collect()
}
