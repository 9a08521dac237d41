//! Error types for Synheart Lumen

use thiserror::Error;

/// Errors that can occur during computation
///
/// None of these are fatal to normalization: the engine recovers from
/// `InsufficientData` and `DegenerateRange` locally and always produces output
/// for non-empty input. The remaining variants surface from I/O edges
/// (configuration files, baseline snapshots, CLI input).
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Insufficient data for {component}: need {required} samples, got {actual}")]
    InsufficientData {
        component: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("Degenerate range: {0}")]
    DegenerateRange(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse input: {0}")]
    ParseError(String),
}

impl ComputeError {
    /// True for the recoverable numeric conditions the strategies handle themselves
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ComputeError::InsufficientData { .. } | ComputeError::DegenerateRange(_)
        )
    }
}
