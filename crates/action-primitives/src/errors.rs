//! Error types for action execution

use soulbrowser_core_types::{ErrorKind, SoulError};
use thiserror::Error;

/// Failures of the execution protocol itself (resolution, registry, artifacts).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// No tool registered under the requested name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not satisfy the tool's declared schema
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Two factories registered under one name
    #[error("Duplicate tool registration: {0}")]
    DuplicateTool(String),

    /// Artifact could not be persisted or loaded
    #[error("Artifact I/O error: {0}")]
    Artifact(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Observation kind this error surfaces as when it aborts an action.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ActionError::UnknownTool(_)
            | ActionError::InvalidArguments { .. }
            | ActionError::DuplicateTool(_) => ErrorKind::ToolError,
            ActionError::Artifact(_) | ActionError::Internal(_) => ErrorKind::Unknown,
        }
    }
}

impl From<ActionError> for SoulError {
    fn from(value: ActionError) -> Self {
        SoulError::new(value.to_string())
    }
}

/// Failure reported by a tool run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    /// Target element does not exist
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Locator matched more than one element
    #[error("selector `{selector}` is ambiguous ({matches} matches)")]
    Ambiguous { selector: String, matches: usize },

    /// Tool-specific failure the tool itself declared
    #[error("{0}")]
    Declared(String),

    /// The tool gave up waiting on the page
    #[error("tool timed out: {0}")]
    Timeout(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl ToolFailure {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ToolFailure::ElementNotFound(_) | ToolFailure::Ambiguous { .. } => {
                ErrorKind::ElementNotFound
            }
            ToolFailure::Declared(_) => ErrorKind::ToolError,
            ToolFailure::Timeout(_) => ErrorKind::Timeout,
            ToolFailure::Other(_) => ErrorKind::Unknown,
        }
    }
}
