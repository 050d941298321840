// for error definitions
use std::time::Duration;
use thiserror::Error;

use crate::resilience::ErrorCategory;

/// Boxed error type accepted from protected operations and fallbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum GuardError {
    /// Returned when a call is rejected because the circuit is open
    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    /// A classified failure of the protected operation
    #[error("{category} failure: {message}")]
    Operation {
        category: ErrorCategory,
        message: String,
    },

    /// A single attempt exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The fallback handler failed or timed out
    #[error("Fallback failed: {0}")]
    Fallback(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No circuit is registered under this name
    #[error("Circuit not found: {0}")]
    CircuitNotFound(String),

    /// A circuit with this name already exists
    #[error("Circuit already registered: {0}")]
    DuplicateCircuit(String),

    /// Health probe errors
    #[error("Health check error: {0}")]
    HealthCheck(String),

    /// Data serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Category of this error in the failure taxonomy, if it has one
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            GuardError::Operation { category, .. } => Some(*category),
            GuardError::Timeout(_) => Some(ErrorCategory::Timeout),
            _ => None,
        }
    }
}

// Redis errors carry typed kinds, so they are categorized up front
impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        let category = crate::resilience::classifier::categorize_redis(&err)
            .unwrap_or(ErrorCategory::System);

        GuardError::Operation {
            category,
            message: err.to_string(),
        }
    }
}

// implement conversions from serde_json::Error to GuardError
impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Serialization(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, GuardError>;
