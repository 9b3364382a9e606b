//! SoulBrowser test agent.
//!
//! A conversation is an append-only event log plus a projection folded from
//! it. A stateless reasoning-loop step reads the projection, executes or
//! proposes tool actions, heals broken selectors, and hands back the events
//! to append. This crate owns the mutable side: the per-conversation handle,
//! the artifact workspace, configuration, logging, and failure reports.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod logging;
pub mod pages;
pub mod report;
pub mod testkit;
pub mod workspace;

pub use config::{
    AgentConfig, ExecutionConfig, LoggingConfig, TestkitConfig, WorkspaceConfig,
};
pub use conversation::Conversation;
pub use errors::{TestkitError, TestkitResult};
pub use logging::{init_logging, init_logging_from};
pub use pages::LatestPageSource;
pub use report::{heal_audit_location, FailureReport, HealAuditJournal};
pub use testkit::Testkit;
pub use workspace::{
    normalize, FsWorkspace, MemoryWorkspace, Workspace, GENERATED_DIR, LAYOUT, REPORTS_DIR,
};

pub use agent_core::{
    IdleReason, ReasoningResponse, ReasoningService, ScriptedReasoning, ScriptedReply,
    SkillBehavior, StepOutcome, ToolCallRequest,
};
pub use soulbrowser_core_types::{
    Action, ConversationId, ConversationStatus, ErrorKind, Observation,
};
