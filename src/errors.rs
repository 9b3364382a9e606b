//! Errors surfaced by the conversation handle and its workspace.

use agent_core::AgentError;
use soulbrowser_core_types::{ConversationStatus, SoulError};
use soulbrowser_event_store::EsError;
use soulbrowser_state_center::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestkitError {
    #[error(transparent)]
    Store(#[from] EsError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("conversation is {0}; it accepts no further input")]
    Terminal(ConversationStatus),

    #[error("no actions are pending")]
    NothingPending,

    #[error("workspace path `{path}` rejected: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("workspace I/O on `{path}` failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TestkitError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The log moved between read and append.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TestkitError::Store(err) if err.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TestkitError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

impl From<TestkitError> for SoulError {
    fn from(value: TestkitError) -> Self {
        SoulError::new(value.to_string())
    }
}

pub type TestkitResult<T> = Result<T, TestkitError>;
