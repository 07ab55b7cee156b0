//! Engine Errors
//!
//! A single error taxonomy shared by the registry, the context state
//! machine, both executors and the validation subsystem.

use serde::Serialize;
use thiserror::Error;

use crate::context::ContextState;
use crate::validation::ValidationResult;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the orchestration engine.
///
/// Normal step failures travel inside [`crate::context::ExecutionRecord`]s
/// and run results; an `EngineError` returned through `Err` means the call
/// itself could not proceed.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Step '{0}' not found")]
    NotFound(String),

    #[error("Step '{0}' is inactive")]
    Inactive(String),

    #[error("Illegal state transition: {from} -> {to}")]
    State { from: ContextState, to: ContextState },

    #[error("Validation failed: {0}")]
    Validation(ValidationResult),

    #[error("Step '{step}' timed out after {timeout_ms} ms")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("Step '{step}' failed: {message}")]
    Execution { step: String, message: String },

    #[error("Rollback failed: {0}")]
    Rollback(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EngineError {
    /// Shorthand for an executor failure.
    pub fn execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Inactive(_) => "INACTIVE",
            Self::State { .. } => "STATE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::Rollback(_) => "ROLLBACK_ERROR",
            Self::Cancelled(_) => "CANCELLED",
            Self::Io(_) => "IO_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
        }
    }

    /// True for timeouts, which the parallel engine reports separately.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
