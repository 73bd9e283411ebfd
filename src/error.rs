//! Error types for the investment agent orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Analysis Errors
    // =============================

    #[error("Insufficient data: {required} price points required, {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("Price data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Feature schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("No analysis available: {0}")]
    NoAnalysisAvailable(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailure(String),

    // =============================
    // Collaborator & Input Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Model artifact error: {0}")]
    Artifact(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Short machine-readable kind, used by the boundary layer and tool call log
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationError::InsufficientData { .. } => "insufficient_data",
            OrchestrationError::DataUnavailable { .. } => "data_unavailable",
            OrchestrationError::EmbeddingUnavailable(_) => "embedding_unavailable",
            OrchestrationError::SchemaMismatch(_) => "schema_mismatch",
            OrchestrationError::NoAnalysisAvailable(_) => "no_analysis_available",
            OrchestrationError::SynthesisFailure(_) => "synthesis_failure",
            OrchestrationError::InvalidInput(_) => "invalid_input",
            OrchestrationError::Timeout { .. } => "timeout",
            OrchestrationError::Provider(_) => "provider",
            OrchestrationError::Planning(_) => "planning",
            OrchestrationError::LlmError(_) => "llm",
            OrchestrationError::Artifact(_) => "artifact",
            OrchestrationError::Config(_) => "config",
            OrchestrationError::SerializationError(_) => "serialization",
            OrchestrationError::HttpError(_) => "http",
            OrchestrationError::IoError(_) => "io",
        }
    }
}
