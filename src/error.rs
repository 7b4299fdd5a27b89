use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Capability not found: {name}")]
    CapabilityNotFound { name: String },

    #[error("Capability already registered with a different implementation: {name}")]
    DuplicateCapability { name: String },

    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Oracle timed out after {timeout_ms}ms")]
    OracleTimeout { timeout_ms: u64 },

    #[error("Oracle auth failed: {0}")]
    OracleAuthFailure(String),

    #[error("Plan parse failure: {0}")]
    PlanParseFailure(String),

    #[error("Plan too long: {steps} steps, {max} max")]
    PlanTooLong { steps: usize, max: usize },

    #[error("Step execution failed: capability={capability}, {message}")]
    StepExecution { capability: String, message: String },

    #[error("Step timed out: capability={capability}, after {timeout_ms}ms")]
    StepTimeout { capability: String, timeout_ms: u64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Execution not found: {id}")]
    ExecutionNotFound { id: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Stable, serializable classification of a [`FlowError`].
///
/// Stored on sealed execution records next to the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CapabilityNotFound,
    DuplicateCapability,
    OracleUnavailable,
    OracleTimeout,
    OracleAuthFailure,
    PlanParseFailure,
    PlanTooLong,
    StepExecutionFailure,
    StepTimeout,
    Cancelled,
    InvalidInput,
    ExecutionNotFound,
    Config,
    Internal,
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::CapabilityNotFound { .. } => ErrorKind::CapabilityNotFound,
            FlowError::DuplicateCapability { .. } => ErrorKind::DuplicateCapability,
            FlowError::OracleUnavailable(_) => ErrorKind::OracleUnavailable,
            FlowError::OracleTimeout { .. } => ErrorKind::OracleTimeout,
            FlowError::OracleAuthFailure(_) => ErrorKind::OracleAuthFailure,
            FlowError::PlanParseFailure(_) => ErrorKind::PlanParseFailure,
            FlowError::PlanTooLong { .. } => ErrorKind::PlanTooLong,
            FlowError::StepExecution { .. } => ErrorKind::StepExecutionFailure,
            FlowError::StepTimeout { .. } => ErrorKind::StepTimeout,
            FlowError::Cancelled => ErrorKind::Cancelled,
            FlowError::InvalidInput(_) => ErrorKind::InvalidInput,
            FlowError::ExecutionNotFound { .. } => ErrorKind::ExecutionNotFound,
            FlowError::Config(_) => ErrorKind::Config,
            FlowError::Serialization(_) | FlowError::Http(_) | FlowError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether this error ends a submission during planning.
    pub fn is_planning_fatal(&self) -> bool {
        !matches!(self, FlowError::PlanParseFailure(_))
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
