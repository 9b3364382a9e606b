//! Core data types for action execution

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soulbrowser_core_types::{Action, ArtifactKind};

/// Raw artifact produced by a tool, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolArtifact {
    pub kind: ArtifactKind,
    /// File name inside the artifact directory.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ToolArtifact {
    pub fn dom_snapshot(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ArtifactKind::DomSnapshot,
            name: "dom.html".to_string(),
            bytes: bytes.into(),
        }
    }

    pub fn screenshot(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ArtifactKind::Screenshot,
            name: "screenshot.png".to_string(),
            bytes: bytes.into(),
        }
    }
}

/// Successful tool result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolOutput {
    pub content: Value,
    pub artifacts: Vec<ToolArtifact>,
}

impl ToolOutput {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: ToolArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// Deadline and retry knobs for [`crate::ActionExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Upper bound for a single attempt.
    pub action_timeout: Duration,
    /// Extra attempts granted after a timeout.
    pub timeout_retries: u32,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(30),
            timeout_retries: 1,
        }
    }
}

impl ExecutionPolicy {
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_timeout_retries(mut self, retries: u32) -> Self {
        self.timeout_retries = retries;
        self
    }
}

/// An action whose resolution has been checked but which has not run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub action: Action,
    pub proposed_at: DateTime<Utc>,
}

impl From<Action> for Proposal {
    fn from(action: Action) -> Self {
        Self {
            action,
            proposed_at: Utc::now(),
        }
    }
}
