//! Error types for the financial chat orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Request / Pipeline Errors
    // =============================

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No eligible tool: {0}")]
    NoEligibleTool(String),

    #[error("Concurrent append in flight for session {0}")]
    ConcurrencyConflict(String),

    #[error("Translation degraded: {0}")]
    TranslationDegraded(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// =============================
// Tool Errors
// =============================

/// Coarse failure class of a tool attempt, recorded on the invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidArguments,
    Unreachable,
    Empty,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::Unreachable => "unreachable",
            ToolErrorKind::Empty => "empty",
        };
        write!(f, "{}", label)
    }
}

/// Failure raised by a tool adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Resource unreachable: {0}")]
    Unreachable(String),

    /// The tool ran but found nothing usable. `available` lists what it did
    /// see (typically column names) so a retry can aim better.
    #[error("No usable content: {reason}")]
    Empty {
        reason: String,
        available: Vec<String>,
    },
}

impl ToolError {
    pub fn empty(reason: impl Into<String>) -> Self {
        ToolError::Empty {
            reason: reason.into(),
            available: Vec::new(),
        }
    }

    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ToolError::InvalidArguments(_) => ToolErrorKind::InvalidArguments,
            ToolError::Unreachable(_) => ToolErrorKind::Unreachable,
            ToolError::Empty { .. } => ToolErrorKind::Empty,
        }
    }

    /// Unreachable resources are not retried, only fallen back from.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ToolError::Unreachable(_))
    }
}

// =============================
// Collaborator Errors
// =============================

/// Failure of an external collaborator (documents, web, charts).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Call timed out after {0} ms")]
    Timeout(u64),
}

impl From<CollaboratorError> for ToolError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Unavailable(msg) => ToolError::Unreachable(msg),
            CollaboratorError::Timeout(ms) => {
                ToolError::Unreachable(format!("timed out after {} ms", ms))
            }
            CollaboratorError::NotFound(msg) => ToolError::InvalidArguments(msg),
            CollaboratorError::ExtractionFailed(msg) => ToolError::empty(msg),
        }
    }
}

impl From<OrchestrationError> for ToolError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::Collaborator(inner) => inner.into(),
            OrchestrationError::InvalidRequest(msg) => ToolError::InvalidArguments(msg),
            other => ToolError::Unreachable(other.to_string()),
        }
    }
}
