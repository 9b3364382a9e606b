//! Reasoning loop for the SoulBrowser test agent.
//!
//! [`step`] reads a conversation view and returns the events to append next:
//! observations for pending actions, or the outcome of one reasoning round.
//! All configuration travels in an immutable [`StepContext`].

pub mod config;
pub mod context;
pub mod errors;
pub mod model;
pub mod reasoning;
pub mod skills;
pub mod step;

pub use config::StepConfig;
pub use context::{assemble_context, finish_tool_spec, offered_tools, FINISH_TOOL};
pub use errors::AgentError;
pub use model::{
    ActionSummary, ConversationRole, ConversationTurn, ReasoningContext, ReasoningResponse,
    ToolCallRequest,
};
pub use reasoning::{query_with_retry, ReasoningService, RetryPolicy, ScriptedReasoning, ScriptedReply};
pub use skills::{SkillActivation, SkillBehavior, SkillEntry, SkillMatcher, SkillTable};
pub use step::{execute_pending, step, IdleReason, StepContext, StepOutcome};
