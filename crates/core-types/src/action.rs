use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ActionId, BatchId};

/// Argument key mirrored into [`Action::attempt_selector`].
pub const SELECTOR_ARG: &str = "selector";

/// Typed request to a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Element locator used by this attempt (browser actions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchId>,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        let attempt_selector = arguments
            .get(SELECTOR_ARG)
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            id: ActionId::new(),
            tool_name: tool_name.into(),
            arguments,
            attempt_selector,
            thought: None,
            batch: None,
        }
    }

    pub fn with_id(mut self, id: ActionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_batch(mut self, batch: BatchId) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    /// Same action (same id) retargeted at another element.
    pub fn with_selector(&self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        let mut next = self.clone();
        if let Value::Object(map) = &mut next.arguments {
            map.insert(SELECTOR_ARG.to_string(), Value::String(selector.clone()));
        }
        next.attempt_selector = Some(selector);
        next
    }

    pub fn selector(&self) -> Option<&str> {
        self.attempt_selector.as_deref()
    }

    /// String argument lookup.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Failure classification carried by unsuccessful observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ElementNotFound,
    Timeout,
    ToolError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ElementNotFound => "element_not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether the failure class has an automatic recovery path.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::ElementNotFound | ErrorKind::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    DomSnapshot,
    Other,
}

/// Lightweight reference to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    /// Workspace-relative path.
    pub location: String,
    #[serde(default)]
    pub bytes: u64,
}

/// Result of executing exactly one [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub action_id: ActionId,
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub result_content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub raw_artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Observation {
    pub fn success(action: &Action, result_content: Value) -> Self {
        Self {
            action_id: action.id.clone(),
            tool_name: action.tool_name.clone(),
            success: true,
            result_content,
            error_kind: None,
            error_message: None,
            raw_artifacts: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn failure(action: &Action, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            action_id: action.id.clone(),
            tool_name: action.tool_name.clone(),
            success: false,
            result_content: Value::Null,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            raw_artifacts: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactRef>) -> Self {
        self.raw_artifacts = artifacts;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_element_not_found(&self) -> bool {
        self.error_kind == Some(ErrorKind::ElementNotFound)
    }

    pub fn dom_snapshot(&self) -> Option<&ArtifactRef> {
        self.raw_artifacts
            .iter()
            .rev()
            .find(|artifact| artifact.kind == ArtifactKind::DomSnapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selector_is_mirrored_from_arguments() {
        let action = Action::new("click", json!({ "selector": "#submit-btn-old" }));
        assert_eq!(action.selector(), Some("#submit-btn-old"));

        let healed = action.with_selector("button[data-testid='submit']");
        assert_eq!(healed.id, action.id);
        assert_eq!(healed.selector(), Some("button[data-testid='submit']"));
        assert_eq!(
            healed.arg_str("selector"),
            Some("button[data-testid='submit']")
        );
    }

    #[test]
    fn failure_observation_carries_kind() {
        let action = Action::new("click", json!({ "selector": "#gone" }));
        let obs = Observation::failure(&action, ErrorKind::ElementNotFound, "no match");
        assert!(!obs.success);
        assert!(obs.is_element_not_found());
        assert_eq!(obs.action_id, action.id);
    }
}
