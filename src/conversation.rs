//! The handle that owns one conversation's event log.

use std::sync::Arc;

use agent_core::{execute_pending, AgentError, IdleReason, StepContext, StepOutcome};
use parking_lot::{Mutex, RwLock};
use soulbrowser_core_types::{Action, ConversationId, ConversationStatus, ErrorKind, Observation};
use soulbrowser_event_store::{Event, EventDraft, EventLog, EventSubscription, StateUpdate};
use soulbrowser_state_center::ConversationState;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{TestkitError, TestkitResult};
use crate::pages::LatestPageSource;
use crate::report::{FailureReport, HealAuditJournal};
use crate::workspace::Workspace;

/// Exclusive owner of one conversation.
///
/// Mutations queue on a FIFO lock and append with a version check. Queries
/// read the last committed state without waiting for that lock.
pub struct Conversation {
    id: ConversationId,
    log: EventLog,
    state: RwLock<ConversationState>,
    fifo: tokio::sync::Mutex<()>,
    ctx: StepContext,
    cancel: Mutex<CancellationToken>,
    workspace: Option<Arc<dyn Workspace>>,
    audits: Option<HealAuditJournal>,
    pages: Option<LatestPageSource>,
}

impl Conversation {
    /// Wraps `log`, folding whatever it already holds.
    pub fn open(log: EventLog, ctx: StepContext) -> TestkitResult<Self> {
        let state = ConversationState::replay(log.snapshot())?;
        let cancel = ctx.cancel.clone();
        info!(
            conversation = %log.conversation(),
            events = state.applied_version(),
            status = %state.current_status(),
            "conversation opened"
        );
        Ok(Self {
            id: log.conversation().clone(),
            log,
            state: RwLock::new(state),
            fifo: tokio::sync::Mutex::new(()),
            ctx,
            cancel: Mutex::new(cancel),
            workspace: None,
            audits: None,
            pages: None,
        })
    }

    /// Journals selector-healing audits into `workspace` and enables
    /// failure reports.
    pub fn with_workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.audits = Some(HealAuditJournal::attach(&self.log));
        self.workspace = Some(workspace);
        self
    }

    /// Keeps `pages` pointed at the newest DOM snapshot this conversation
    /// has recorded.
    pub fn with_page_tracker(mut self, pages: LatestPageSource) -> Self {
        pages.record(
            self.state
                .read()
                .latest_dom_snapshot()
                .map(|artifact| artifact.location.as_str()),
        );
        self.pages = Some(pages);
        self
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Every committed event, in append order.
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.log.snapshot()
    }

    pub fn version(&self) -> u64 {
        self.log.version()
    }

    pub fn status(&self) -> ConversationStatus {
        self.state.read().current_status()
    }

    pub fn pending_actions(&self) -> Vec<Action> {
        self.state
            .read()
            .pending_actions()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Last committed state.
    pub fn snapshot(&self) -> ConversationState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.log.subscribe()
    }

    /// Runs one reasoning-loop step and appends what it produced.
    pub async fn step(&self) -> TestkitResult<StepOutcome> {
        let _turn = self.fifo.lock().await;
        let view = self.current_view()?;
        let ctx = self.step_context();
        let outcome = match agent_core::step(&view, &ctx).await {
            Ok(outcome) => outcome,
            Err(AgentError::Cancelled) => {
                debug!(conversation = %self.id, "step cancelled");
                return Ok(StepOutcome::Idle(IdleReason::Paused));
            }
            Err(err) => return Err(err.into()),
        };
        self.commit(outcome.drafts().to_vec(), view.applied_version())
            .await?;
        Ok(outcome)
    }

    /// Steps until the loop goes idle or `max_steps` steps have run.
    pub async fn run(&self, max_steps: usize) -> TestkitResult<ConversationStatus> {
        for _ in 0..max_steps {
            if self.step().await?.is_idle() {
                break;
            }
        }
        Ok(self.status())
    }

    pub async fn send_user_message(&self, text: impl Into<String>) -> TestkitResult<()> {
        let _turn = self.fifo.lock().await;
        let view = self.current_view()?;
        if view.is_terminal() {
            return Err(TestkitError::Terminal(view.current_status()));
        }
        self.commit(vec![EventDraft::user_message(text)], view.applied_version())
            .await
    }

    /// Runs the actions held for confirmation.
    pub async fn confirm(&self) -> TestkitResult<()> {
        let _turn = self.fifo.lock().await;
        let view = self.current_view()?;
        if !view.has_pending() {
            return Err(TestkitError::NothingPending);
        }
        info!(conversation = %self.id, actions = view.pending_actions().len(), "actions confirmed");
        let drafts = execute_pending(&view, &self.step_context()).await;
        self.commit(drafts, view.applied_version()).await
    }

    /// Answers every held action with a rejection observation.
    pub async fn reject(&self, reason: &str) -> TestkitResult<()> {
        let _turn = self.fifo.lock().await;
        let view = self.current_view()?;
        if !view.has_pending() {
            return Err(TestkitError::NothingPending);
        }
        let drafts = view
            .pending_actions()
            .into_iter()
            .map(|action| EventDraft::observation(self.ctx.executor.reject(action, reason)))
            .collect();
        self.commit(drafts, view.applied_version()).await
    }

    /// Interrupts in-flight work and holds the loop until [`Self::resume`].
    pub async fn pause(&self, reason: &str) -> TestkitResult<()> {
        self.cancel.lock().cancel();
        let _turn = self.fifo.lock().await;
        let view = self.current_view()?;
        if view.is_paused() || view.is_terminal() {
            return Ok(());
        }
        info!(conversation = %self.id, reason, "conversation paused");
        self.commit(
            vec![EventDraft::state(StateUpdate::Paused {
                reason: reason.to_string(),
            })],
            view.applied_version(),
        )
        .await
    }

    pub async fn resume(&self) -> TestkitResult<()> {
        let _turn = self.fifo.lock().await;
        *self.cancel.lock() = CancellationToken::new();
        let view = self.current_view()?;
        if !view.is_paused() {
            return Ok(());
        }
        info!(conversation = %self.id, "conversation resumed");
        self.commit(
            vec![EventDraft::state(StateUpdate::Resumed)],
            view.applied_version(),
        )
        .await
    }

    /// Ends the conversation: pending actions time out and the status
    /// becomes `error`.
    pub async fn cancel(&self, reason: &str) -> TestkitResult<()> {
        self.cancel.lock().cancel();
        let _turn = self.fifo.lock().await;
        let view = self.current_view()?;
        let mut drafts: Vec<EventDraft> = view
            .pending_actions()
            .into_iter()
            .map(|action| {
                EventDraft::observation(Observation::failure(
                    action,
                    ErrorKind::Timeout,
                    format!("cancelled: {reason}"),
                ))
            })
            .collect();
        if !view.is_terminal() {
            drafts.push(EventDraft::status(
                ConversationStatus::Error,
                Some(format!("cancelled: {reason}")),
            ));
        }
        warn!(conversation = %self.id, reason, pending = drafts.len().saturating_sub(1), "conversation cancelled");
        self.commit(drafts, view.applied_version()).await
    }

    /// Registers text the condensed page must keep for later checks.
    pub async fn register_assertion(&self, text: impl Into<String>) -> TestkitResult<()> {
        let _turn = self.fifo.lock().await;
        let view = self.current_view()?;
        self.commit(
            vec![EventDraft::state(StateUpdate::AssertionRegistered {
                text: text.into(),
            })],
            view.applied_version(),
        )
        .await
    }

    pub fn failure_report(&self) -> Option<FailureReport> {
        FailureReport::from_state(&self.id, &self.state.read())
    }

    /// Writes the failure report into the workspace, if there is one to
    /// write. Returns its location.
    pub async fn write_failure_report(&self) -> TestkitResult<Option<String>> {
        let (Some(workspace), Some(report)) = (&self.workspace, self.failure_report()) else {
            return Ok(None);
        };
        report.write_to(workspace.as_ref()).await.map(Some)
    }

    /// Folds events appended through other handles onto the log, then
    /// returns the state to mutate from. Caller holds the FIFO lock.
    fn current_view(&self) -> TestkitResult<ConversationState> {
        let mut state = self.state.write();
        let behind = state.applied_version();
        let head = self.log.version();
        if behind < head {
            warn!(conversation = %self.id, from = behind, to = head, "state behind the log; catching up");
            state.apply_all(&self.log.slice(behind, head))?;
            if let Some(pages) = &self.pages {
                pages.record(state.latest_dom_snapshot().map(|artifact| artifact.location.as_str()));
            }
        }
        Ok(state.clone())
    }

    fn step_context(&self) -> StepContext {
        let cancel = self.cancel.lock().clone();
        self.ctx.clone().with_cancellation(cancel)
    }

    /// Appends `drafts` if the log is still at `expected`, then folds them.
    /// Caller holds the FIFO lock.
    async fn commit(&self, drafts: Vec<EventDraft>, expected: u64) -> TestkitResult<()> {
        if drafts.is_empty() {
            return Ok(());
        }
        let range = self.log.append_batch(drafts, Some(expected)).await?;
        let committed = self.log.slice(range.start, range.end);
        {
            let mut state = self.state.write();
            state.apply_all(&committed)?;
            if let Some(pages) = &self.pages {
                pages.record(state.latest_dom_snapshot().map(|artifact| artifact.location.as_str()));
            }
        }
        debug!(
            conversation = %self.id,
            from = range.start,
            to = range.end,
            status = %self.status(),
            "state advanced"
        );
        if let (Some(audits), Some(workspace)) = (&self.audits, &self.workspace) {
            if let Err(err) = audits.flush(workspace.as_ref()).await {
                warn!(conversation = %self.id, error = %err, "heal audit journal not written");
            }
        }
        Ok(())
    }
}
