//! Error types for Synheart Sentinel

use thiserror::Error;

/// Errors that can occur while turning sensor readings into alerts
#[derive(Debug, Error)]
pub enum AlertError {
    /// Reading rejected by the extractor's quality gate. Dropped silently by the pipeline.
    #[error("Data quality below minimum: {0}")]
    DataQuality(String),

    /// Not enough history to run a statistical check. Treated as "no anomaly yet".
    #[error("Insufficient history: {0}")]
    InsufficientHistory(String),

    /// Circuit breaker is open; callers should back off and retry later.
    #[error("Alert pipeline unavailable (circuit open)")]
    PipelineUnavailable,

    #[error("Alert pipeline exceeded its {0} ms budget")]
    PipelineTimeout(u64),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Analysis task failed: {0}")]
    Analysis(String),
}

impl AlertError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AlertError::PipelineUnavailable
                | AlertError::PipelineTimeout(_)
                | AlertError::PersistenceFailure(_)
        )
    }
}
