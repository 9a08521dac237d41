//! Synheart Lumen - Context-aware normalization for wearable optical signals
//!
//! Lumen turns raw, drifting multi-channel optical samples into stable,
//! comparable values. A caller-owned `NormalizationEngine` runs the pipeline:
//! telemetry summary → device context → baseline learning → strategy
//! selection → normalized output.
//!
//! ## Modules
//!
//! - **Context**: Classify device placement from motion, temperature and charge telemetry
//! - **Segments**: Partition optical windows into stable and unstable runs
//! - **Baseline**: Confidence-gated median baseline with snapshot persistence
//! - **Normalizer**: Interchangeable normalization strategies and their selector
//! - **Trend**: Bucketed, memoized trends over normalized output

pub mod align;
pub mod baseline;
pub mod config;
pub mod context;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod segments;
pub mod stats;
pub mod telemetry;
pub mod trend;
pub mod types;

#[cfg(test)]
mod tests_proptest;

pub use baseline::{BaselineDiagnostics, BaselineEstimator, BaselineSnapshot, BaselineState};
pub use config::EngineConfig;
pub use context::DeviceContextClassifier;
pub use error::ComputeError;
pub use normalizer::{NormalizationMethod, NormalizationStrategy, Normalizer};
pub use pipeline::{NormalizationEngine, NormalizationResult};
pub use segments::SegmentDetector;
pub use trend::{ResultCache, TimeRange, TrendAggregator, TrendMetric, TrendPoint};
pub use types::{DeviceContext, DeviceState, OpticalSample, Segment, TelemetrySample};

/// Lumen version embedded in baseline snapshots
pub const LUMEN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for baseline snapshots
pub const PRODUCER_NAME: &str = "synheart-lumen";
