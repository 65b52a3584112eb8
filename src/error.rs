//! Error types for the freight intake pipeline.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Text-service (LLM provider) errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Context length exceeded: {used} tokens used, {limit} allowed")]
    ContextLengthExceeded { used: usize, limit: usize },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    /// Whether a retry with the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. }
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::InvalidResponse { .. }
        )
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Text service unreachable or unparseable during classification.
    /// The message is treated as "not a request" until redelivered.
    #[error("Classification failed: {reason}")]
    ClassificationFault { reason: String },

    /// Text service unreachable or unparseable during extraction.
    #[error("Extraction failed: {reason}")]
    ExtractionFault { reason: String },

    #[error("Clarification rounds exhausted for {conversation_id} after {rounds} round(s)")]
    ValidationExhausted {
        conversation_id: String,
        rounds: u32,
    },

    #[error("No pending clarification matches conversation {conversation_id}")]
    CorrelationFailure { conversation_id: String },

    #[error("Conversation {conversation_id} in state {from}, cannot transition to {to}")]
    InvalidTransition {
        conversation_id: String,
        from: String,
        to: String,
    },

    #[error("Shipment for {conversation_id} is not valid: {blocking} blocking issue(s)")]
    NotValid {
        conversation_id: String,
        blocking: usize,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl PipelineError {
    /// Whether redelivering the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ClassificationFault { .. } | Self::ExtractionFault { .. } => true,
            Self::Llm(e) => e.is_retryable(),
            Self::Database(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
