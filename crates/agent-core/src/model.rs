use perceiver_structural::CondensedDOM;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soulbrowser_core_types::{Action, EventSource, Observation};

/// Role of a conversation turn handed to the reasoning service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Agent,
}

impl ConversationRole {
    pub fn from_source(source: EventSource) -> Option<Self> {
        match source {
            EventSource::User => Some(ConversationRole::User),
            EventSource::Agent => Some(ConversationRole::Agent),
            EventSource::Environment => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub content: String,
}

/// Compact record of one completed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub tool: String,
    pub arguments: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub result: Value,
}

impl ActionSummary {
    pub fn from_pair(action: &Action, observation: &Observation) -> Self {
        Self {
            tool: action.tool_name.clone(),
            arguments: action.arguments.clone(),
            success: observation.success,
            error_kind: observation.error_kind.map(|kind| kind.as_str().to_string()),
            error_message: observation.error_message.clone(),
            result: observation.result_content.clone(),
        }
    }
}

/// Everything the reasoning service sees for one decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningContext {
    pub messages: Vec<ConversationTurn>,
    pub recent_actions: Vec<ActionSummary>,
    /// Condensed form of the latest captured page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<CondensedDOM>,
    pub pending_assertions: Vec<String>,
    /// Guidance text from activated skills.
    pub guidance: Vec<String>,
    pub active_skills: Vec<String>,
}

impl ReasoningContext {
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|turn| turn.role == ConversationRole::User)
            .map(|turn| turn.content.as_str())
    }
}

/// One tool invocation requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}

impl ToolCallRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            thought: None,
        }
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReasoningResponse {
    ToolCalls(Vec<ToolCallRequest>),
    Text(String),
}
