//! The reasoning-loop step: a pure function from a conversation view to the
//! events that should be appended next.

use std::sync::Arc;

use action_locator::SelfHealer;
use action_primitives::ActionExecutor;
use chrono::Utc;
use serde_json::Value;
use soulbrowser_core_types::{Action, BatchId, ConversationStatus, EventId, Observation};
use soulbrowser_event_store::{Event, EventDraft, StateUpdate};
use soulbrowser_state_center::{ConversationState, StuckDetector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StepConfig;
use crate::context::{assemble_context, offered_tools, skill_context_text, FINISH_TOOL};
use crate::errors::AgentError;
use crate::model::{ReasoningResponse, ToolCallRequest};
use crate::reasoning::{query_with_retry, ReasoningService};
use crate::skills::{SkillMatcher, SkillTable};

/// Immutable inputs shared by every step of one conversation.
#[derive(Clone)]
pub struct StepContext {
    pub executor: ActionExecutor,
    /// Recovery for missing elements; without it such failures are final.
    pub healer: Option<SelfHealer>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub skills: Arc<dyn SkillMatcher>,
    pub config: StepConfig,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(executor: ActionExecutor, reasoning: Arc<dyn ReasoningService>) -> Self {
        Self {
            executor,
            healer: None,
            reasoning,
            skills: Arc::new(SkillTable::new()),
            config: StepConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_healer(mut self, healer: SelfHealer) -> Self {
        self.healer = Some(healer);
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillMatcher>) -> Self {
        self.skills = skills;
        self
    }

    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    Terminal(ConversationStatus),
    Paused,
    AwaitingUser,
    AwaitingConfirmation,
}

/// What a step produced. Drafts are appended as one batch, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Idle(IdleReason),
    /// Observations (and audits, and possibly a stuck status) for the
    /// actions that were pending.
    Executed(Vec<EventDraft>),
    /// New actions from one reasoning round.
    Proposed(Vec<EventDraft>),
    /// An agent message, possibly ending the conversation.
    Replied(Vec<EventDraft>),
    /// A terminal error status.
    Halted(Vec<EventDraft>),
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, StepOutcome::Idle(_))
    }

    pub fn drafts(&self) -> &[EventDraft] {
        match self {
            StepOutcome::Idle(_) => &[],
            StepOutcome::Executed(drafts)
            | StepOutcome::Proposed(drafts)
            | StepOutcome::Replied(drafts)
            | StepOutcome::Halted(drafts) => drafts,
        }
    }

    pub fn into_drafts(self) -> Vec<EventDraft> {
        match self {
            StepOutcome::Idle(_) => Vec::new(),
            StepOutcome::Executed(drafts)
            | StepOutcome::Proposed(drafts)
            | StepOutcome::Replied(drafts)
            | StepOutcome::Halted(drafts) => drafts,
        }
    }
}

/// Advances the conversation by one unit of work.
///
/// Only [`AgentError::Cancelled`] escapes; every other failure is expressed
/// as events.
pub async fn step(view: &ConversationState, ctx: &StepContext) -> Result<StepOutcome, AgentError> {
    if let Some(reason) = idle_reason(view, &ctx.config) {
        debug!(?reason, "nothing to do");
        return Ok(StepOutcome::Idle(reason));
    }

    if view.has_pending() {
        let mut drafts = execute_pending(view, ctx).await;
        if let Some(stuck) = detect_stuck(view, &drafts, &ctx.config) {
            drafts.push(stuck);
        }
        return Ok(StepOutcome::Executed(drafts));
    }

    if view.agent_rounds() >= ctx.config.max_iterations {
        warn!(rounds = view.agent_rounds(), limit = ctx.config.max_iterations, "iteration limit reached");
        return Ok(StepOutcome::Halted(vec![EventDraft::status(
            ConversationStatus::Error,
            Some(format!(
                "iteration limit of {} reached",
                ctx.config.max_iterations
            )),
        )]));
    }

    let activations = ctx.skills.activate(&skill_context_text(view));
    let tools = offered_tools(ctx.executor.registry(), ctx.skills.as_ref(), &activations);
    let context = assemble_context(view, ctx.executor.sink(), &activations, &ctx.config).await;
    debug!(
        messages = context.messages.len(),
        recent = context.recent_actions.len(),
        page = context.page.is_some(),
        skills = context.active_skills.len(),
        tools = tools.len(),
        "context assembled"
    );

    let response = match query_with_retry(
        ctx.reasoning.as_ref(),
        &context,
        &tools,
        &ctx.config,
        &ctx.cancel,
    )
    .await
    {
        Ok(response) => response,
        Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
        Err(err) => {
            warn!(error = %err, "reasoning failed; stopping conversation");
            return Ok(StepOutcome::Halted(vec![EventDraft::status(
                ConversationStatus::Error,
                Some(err.to_string()),
            )]));
        }
    };

    Ok(match response {
        ReasoningResponse::ToolCalls(calls) => propose(calls, ctx),
        ReasoningResponse::Text(text) => {
            info!(chars = text.len(), "agent replied");
            StepOutcome::Replied(vec![EventDraft::agent_message(text)])
        }
    })
}

fn idle_reason(view: &ConversationState, config: &StepConfig) -> Option<IdleReason> {
    if view.is_terminal() {
        return Some(IdleReason::Terminal(view.current_status()));
    }
    if view.is_paused() {
        return Some(IdleReason::Paused);
    }
    let awaiting_confirmation = view.current_status() == ConversationStatus::WaitingForConfirmation
        || (config.confirmation_mode && view.has_pending());
    if awaiting_confirmation {
        return Some(IdleReason::AwaitingConfirmation);
    }
    if view.awaiting_user() {
        return Some(IdleReason::AwaitingUser);
    }
    None
}

/// Executes every pending action in append order. Each yields exactly one
/// observation draft, followed by a heal audit when its selector was
/// repaired. Stops early, leaving the rest pending, once `ctx.cancel` fires.
pub async fn execute_pending(view: &ConversationState, ctx: &StepContext) -> Vec<EventDraft> {
    let mut drafts = Vec::new();
    for action in view.pending_actions() {
        if ctx.cancel.is_cancelled() {
            debug!(action_id = %action.id, "cancelled; leaving action pending");
            break;
        }
        drafts.extend(run_action(action, ctx).await);
    }
    drafts
}

async fn run_action(action: &Action, ctx: &StepContext) -> Vec<EventDraft> {
    let deadline = ctx.executor.deadline_from_now();
    let observation = if ctx.config.confirmation_mode {
        ctx.executor.commit(action.clone(), deadline, &ctx.cancel).await
    } else {
        ctx.executor.execute(action, deadline, &ctx.cancel).await
    };
    let (observation, audit) = match &ctx.healer {
        Some(healer) if observation.is_element_not_found() => healer
            .recover(action, observation, ctx.executor.deadline_from_now(), &ctx.cancel)
            .await
            .into_parts(),
        _ => (observation, None),
    };
    let mut drafts = vec![EventDraft::observation(observation)];
    if let Some(audit) = audit {
        drafts.push(EventDraft::state(StateUpdate::SelectorHealed(audit)));
    }
    drafts
}

/// Folds `drafts` onto a copy of `view` and checks for repetition.
fn detect_stuck(
    view: &ConversationState,
    drafts: &[EventDraft],
    config: &StepConfig,
) -> Option<EventDraft> {
    let mut preview = view.clone();
    let start = view.applied_version();
    for (offset, draft) in drafts.iter().enumerate() {
        let event = Event {
            id: EventId::new(),
            index: start + offset as u64,
            timestamp: Utc::now(),
            source: draft.source,
            kind: draft.kind.clone(),
        };
        if let Err(err) = preview.apply(&event) {
            warn!(error = %err, "stuck preview failed");
            return None;
        }
    }
    if preview.is_terminal() {
        return None;
    }
    let reason = StuckDetector::new(config.stuck_threshold).check(&preview)?;
    warn!(%reason, "conversation is stuck");
    Some(EventDraft::status(
        ConversationStatus::Stuck,
        Some(reason.to_string()),
    ))
}

/// In confirmation mode each action is checked for resolution first; one
/// that cannot resolve is answered at once instead of being held.
fn propose(calls: Vec<ToolCallRequest>, ctx: &StepContext) -> StepOutcome {
    if let Some(finish) = calls.iter().find(|call| call.tool == FINISH_TOOL) {
        if calls.len() > 1 {
            debug!(dropped = calls.len() - 1, "finish requested; other calls dropped");
        }
        return finish_outcome(finish);
    }

    let batch = BatchId::new();
    let proposed = calls.len();
    let mut drafts = Vec::with_capacity(proposed + 1);
    let mut held = 0usize;
    for call in calls {
        let mut action = Action::new(call.tool, call.arguments).with_batch(batch.clone());
        if let Some(thought) = call.thought {
            action = action.with_thought(thought);
        }
        if !ctx.config.confirmation_mode {
            drafts.push(EventDraft::action(action));
            continue;
        }
        match ctx.executor.propose(action.clone()) {
            Ok(proposal) => {
                held += 1;
                drafts.push(EventDraft::action(proposal.action));
            }
            Err(err) => {
                warn!(action_id = %action.id, tool = %action.tool_name, error = %err, "proposal rejected");
                let observation = Observation::failure(&action, err.error_kind(), err.to_string());
                drafts.push(EventDraft::action(action));
                drafts.push(EventDraft::observation(observation));
            }
        }
    }
    info!(actions = proposed, held, batch = %batch.0, "actions proposed");
    if held > 0 {
        drafts.push(EventDraft::status(
            ConversationStatus::WaitingForConfirmation,
            Some("actions await confirmation".into()),
        ));
    }
    StepOutcome::Proposed(drafts)
}

fn finish_outcome(call: &ToolCallRequest) -> StepOutcome {
    let success = call
        .arguments
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let summary = call
        .arguments
        .get("summary")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if success {
                "test passed".to_string()
            } else {
                "test failed".to_string()
            }
        });
    let status = if success {
        ConversationStatus::Success
    } else {
        ConversationStatus::Error
    };
    info!(%status, "agent finished");
    StepOutcome::Replied(vec![
        EventDraft::agent_message(summary.clone()),
        EventDraft::status(status, Some(summary)),
    ])
}
