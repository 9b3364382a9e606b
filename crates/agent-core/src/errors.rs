use soulbrowser_core_types::SoulError;
use thiserror::Error;

/// Errors emitted by the agent-core crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The reasoning service failed to answer.
    #[error("reasoning service failed: {0}")]
    Reasoning(String),

    /// A reasoning query ran past its time budget.
    #[error("reasoning query timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The service answered with something the loop cannot act on.
    #[error("invalid reasoning response: {0}")]
    InvalidResponse(String),

    /// A skill table entry could not be built.
    #[error("invalid skill `{name}`: {reason}")]
    Skill { name: String, reason: String },

    /// The conversation's cancellation token fired mid-step.
    #[error("step cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn reasoning(message: impl Into<String>) -> Self {
        Self::Reasoning(message.into())
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    pub fn skill(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Skill {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether another query attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Reasoning(_) | AgentError::Timeout { .. } | AgentError::InvalidResponse(_)
        )
    }
}

impl From<AgentError> for SoulError {
    fn from(value: AgentError) -> Self {
        SoulError::new(value.to_string())
    }
}
