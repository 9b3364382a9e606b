//! Error types for selector recovery

use soulbrowser_core_types::SoulError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// No page snapshot could be obtained for diagnosis
    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// Snapshot could not be parsed or condensed
    #[error("Perception failed: {0}")]
    Perception(String),

    /// Probe could not evaluate a candidate
    #[error("Probe failed for `{selector}`: {reason}")]
    ProbeFailed { selector: String, reason: String },

    /// Event not accepted in the current recovery state
    #[error("Invalid transition: {event} in state {state}")]
    InvalidTransition { state: String, event: String },

    /// The conversation was paused or cancelled mid-recovery
    #[error("Recovery cancelled")]
    Cancelled,

    /// The recovery deadline passed while waiting on the page
    #[error("Recovery deadline exceeded during {0}")]
    DeadlineExceeded(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LocatorError {
    /// Cancellation or deadline expiry: recovery must stop, not demote.
    pub fn is_interruption(&self) -> bool {
        matches!(self, LocatorError::Cancelled | LocatorError::DeadlineExceeded(_))
    }
}

impl From<perceiver_structural::PerceiverError> for LocatorError {
    fn from(value: perceiver_structural::PerceiverError) -> Self {
        LocatorError::Perception(value.to_string())
    }
}

impl From<LocatorError> for SoulError {
    fn from(value: LocatorError) -> Self {
        SoulError::new(value.to_string())
    }
}
