//! Queryable current state of a conversation, folded from its event log.
//!
//! The projection is incremental: [`ConversationState::apply`] consumes one
//! event at a time and must produce exactly what [`ConversationState::replay`]
//! produces from scratch over the same events.

use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use soulbrowser_core_types::{
    Action, ActionId, ArtifactRef, BatchId, ConversationStatus, EventSource, Observation,
    SoulError,
};
use soulbrowser_event_store::{Event, EventKind, HealAudit, StateUpdate};

mod stuck;

pub use stuck::{StuckDetector, StuckReason};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("event {found} applied out of order; expected index {expected}")]
    OutOfOrder { expected: u64, found: u64 },
}

impl From<StateError> for SoulError {
    fn from(value: StateError) -> Self {
        SoulError::new(value.to_string())
    }
}

/// History that cannot be reconciled, such as an observation with no action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Inconsistency {
    pub index: u64,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub index: u64,
    pub source: EventSource,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Turn {
    User,
    AgentMessage,
    AgentAction,
}

#[derive(Clone, Debug, PartialEq)]
struct ActionSlot {
    action: Action,
    observation: Option<Observation>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationState {
    status: ConversationStatus,
    status_reason: Option<String>,
    applied: u64,
    slots: Vec<ActionSlot>,
    by_action: HashMap<ActionId, usize>,
    pending: BTreeSet<usize>,
    // Slot positions in the order their observations arrived.
    completed: Vec<usize>,
    failures: Vec<usize>,
    messages: Vec<ChatMessage>,
    heal_audit: Vec<HealAudit>,
    assertions: Vec<String>,
    inconsistencies: Vec<Inconsistency>,
    paused: Option<String>,
    last_turn: Option<Turn>,
    last_batch: Option<BatchId>,
    agent_rounds: u32,
    latest_dom: Option<ArtifactRef>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the projection from scratch.
    pub fn replay<I, E>(events: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = E>,
        E: Borrow<Event>,
    {
        let mut state = Self::default();
        state.apply_all(events)?;
        Ok(state)
    }

    pub fn apply_all<I, E>(&mut self, events: I) -> Result<(), StateError>
    where
        I: IntoIterator<Item = E>,
        E: Borrow<Event>,
    {
        for event in events {
            self.apply(event.borrow())?;
        }
        Ok(())
    }

    /// Folds the next event. Events must arrive in index order without gaps.
    pub fn apply(&mut self, event: &Event) -> Result<(), StateError> {
        if event.index != self.applied {
            return Err(StateError::OutOfOrder {
                expected: self.applied,
                found: event.index,
            });
        }
        match &event.kind {
            EventKind::Message(message) => {
                self.apply_message(event.index, event.source, &message.content)
            }
            EventKind::Action(action) => self.apply_action(event.index, action),
            EventKind::Observation(observation) => {
                self.apply_observation(event.index, observation)
            }
            EventKind::StateUpdate(update) => self.apply_update(update),
        }
        self.applied += 1;
        Ok(())
    }

    fn apply_message(&mut self, index: u64, source: EventSource, content: &str) {
        self.messages.push(ChatMessage {
            index,
            source,
            content: content.to_string(),
        });
        match source {
            EventSource::User => self.last_turn = Some(Turn::User),
            EventSource::Agent => {
                self.last_turn = Some(Turn::AgentMessage);
                self.agent_rounds += 1;
                self.last_batch = None;
            }
            EventSource::Environment => {}
        }
    }

    fn apply_action(&mut self, index: u64, action: &Action) {
        if self.by_action.contains_key(&action.id) {
            self.record_inconsistency(index, format!("action {} appended twice", action.id));
            return;
        }
        let position = self.slots.len();
        self.slots.push(ActionSlot {
            action: action.clone(),
            observation: None,
        });
        self.by_action.insert(action.id.clone(), position);
        self.pending.insert(position);
        self.last_turn = Some(Turn::AgentAction);

        let same_round = action.batch.is_some() && action.batch == self.last_batch;
        if !same_round {
            self.agent_rounds += 1;
        }
        self.last_batch = action.batch.clone();
    }

    fn apply_observation(&mut self, index: u64, observation: &Observation) {
        let Some(&position) = self.by_action.get(&observation.action_id) else {
            self.record_inconsistency(
                index,
                format!("observation for unknown action {}", observation.action_id),
            );
            return;
        };
        if self.slots[position].observation.is_some() {
            self.record_inconsistency(
                index,
                format!("second observation for action {}", observation.action_id),
            );
            return;
        }

        self.slots[position].observation = Some(observation.clone());
        self.pending.remove(&position);
        self.completed.push(position);
        if !observation.success {
            self.failures.push(position);
        }
        if let Some(dom) = observation.dom_snapshot() {
            self.latest_dom = Some(dom.clone());
        }
        if self.status == ConversationStatus::WaitingForConfirmation && self.pending.is_empty() {
            self.status = ConversationStatus::Running;
            self.status_reason = None;
        }
    }

    fn apply_update(&mut self, update: &StateUpdate) {
        match update {
            StateUpdate::StatusChanged { status, reason } => {
                self.set_status(*status, reason.clone())
            }
            StateUpdate::SelectorHealed(audit) => self.heal_audit.push(audit.clone()),
            StateUpdate::Paused { reason } => self.paused = Some(reason.clone()),
            StateUpdate::Resumed => self.paused = None,
            StateUpdate::AssertionRegistered { text } => self.assertions.push(text.clone()),
        }
    }

    fn set_status(&mut self, status: ConversationStatus, reason: Option<String>) {
        if self.status.is_terminal() {
            if status != self.status {
                debug!(
                    current = %self.status,
                    requested = %status,
                    "ignoring transition out of terminal status"
                );
            }
            return;
        }
        self.status = status;
        self.status_reason = reason;
    }

    fn record_inconsistency(&mut self, index: u64, detail: String) {
        warn!(index, %detail, "inconsistent conversation history");
        self.inconsistencies.push(Inconsistency {
            index,
            detail: detail.clone(),
        });
        self.set_status(ConversationStatus::Error, Some(detail));
    }

    pub fn current_status(&self) -> ConversationStatus {
        self.status
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of events folded so far; equals the log version it reflects.
    pub fn applied_version(&self) -> u64 {
        self.applied
    }

    /// Actions without an observation, in append order.
    pub fn pending_actions(&self) -> Vec<&Action> {
        self.pending
            .iter()
            .map(|&position| &self.slots[position].action)
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Failed action/observation pairs in the order the failures arrived.
    pub fn unmatched_failures(&self) -> Vec<(&Action, &Observation)> {
        self.failures
            .iter()
            .filter_map(|&position| self.pair(position))
            .collect()
    }

    /// Earliest failure not later retried successfully with the same tool
    /// and arguments.
    pub fn first_unresolved_failure(&self) -> Option<(&Action, &Observation)> {
        self.failures.iter().find_map(|&failed| {
            let (action, observation) = self.pair(failed)?;
            let order = self.completed.iter().position(|&p| p == failed)?;
            let retried = self.completed[order + 1..].iter().any(|&later| {
                self.pair(later).is_some_and(|(other, outcome)| {
                    outcome.success
                        && other.tool_name == action.tool_name
                        && other.arguments == action.arguments
                })
            });
            (!retried).then_some((action, observation))
        })
    }

    /// The last `count` completed pairs, oldest first.
    pub fn recent_pairs(&self, count: usize) -> Vec<(&Action, &Observation)> {
        let start = self.completed.len().saturating_sub(count);
        self.completed[start..]
            .iter()
            .filter_map(|&position| self.pair(position))
            .collect()
    }

    pub fn action(&self, id: &ActionId) -> Option<&Action> {
        self.by_action
            .get(id)
            .map(|&position| &self.slots[position].action)
    }

    pub fn observation_for(&self, id: &ActionId) -> Option<&Observation> {
        self.by_action
            .get(id)
            .and_then(|&position| self.slots[position].observation.as_ref())
    }

    fn pair(&self, position: usize) -> Option<(&Action, &Observation)> {
        let slot = self.slots.get(position)?;
        slot.observation.as_ref().map(|obs| (&slot.action, obs))
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    pub fn pause_reason(&self) -> Option<&str> {
        self.paused.as_deref()
    }

    /// The agent spoke last and the conversation is still open.
    pub fn awaiting_user(&self) -> bool {
        !self.status.is_terminal() && self.last_turn == Some(Turn::AgentMessage)
    }

    pub fn heal_audit(&self) -> &[HealAudit] {
        &self.heal_audit
    }

    /// Reasoning rounds so far: one per agent message or action batch.
    pub fn agent_rounds(&self) -> u32 {
        self.agent_rounds
    }

    pub fn pending_assertions(&self) -> &[String] {
        &self.assertions
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.source == EventSource::User)
            .map(|message| message.content.as_str())
    }

    pub fn inconsistencies(&self) -> &[Inconsistency] {
        &self.inconsistencies
    }

    pub fn latest_dom_snapshot(&self) -> Option<&ArtifactRef> {
        self.latest_dom.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use soulbrowser_core_types::{ConversationId, ErrorKind};
    use soulbrowser_event_store::{EventDraft, EventLog};

    fn log() -> EventLog {
        EventLog::in_memory(ConversationId::named("state-test"))
    }

    fn click(selector: &str) -> Action {
        Action::new("click", json!({ "selector": selector }))
    }

    fn project(log: &EventLog) -> ConversationState {
        ConversationState::replay(log.snapshot()).expect("replay")
    }

    #[tokio::test]
    async fn observations_match_by_action_id() {
        let log = log();
        let batch = BatchId::new();
        let first = click("#a").with_batch(batch.clone());
        let second = click("#b").with_batch(batch);
        log.append_batch(
            vec![
                EventDraft::action(first.clone()),
                EventDraft::action(second.clone()),
            ],
            None,
        )
        .await
        .unwrap();

        // Second action finishes first.
        log.append(
            EventDraft::observation(Observation::failure(&second, ErrorKind::ToolError, "boom")),
            None,
        )
        .await
        .unwrap();
        let state = project(&log);
        assert_eq!(state.pending_actions(), vec![&first]);

        log.append(
            EventDraft::observation(Observation::success(&first, json!("ok"))),
            None,
        )
        .await
        .unwrap();
        let state = project(&log);
        assert!(state.pending_actions().is_empty());
        assert!(state.observation_for(&first.id).unwrap().success);
        let failures = state.unmatched_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.id, second.id);
        assert_eq!(state.agent_rounds(), 1);
        assert_eq!(state.current_status(), ConversationStatus::Running);
    }

    #[tokio::test]
    async fn orphan_observation_is_an_error() {
        let log = log();
        let ghost = click("#ghost");
        log.append(
            EventDraft::observation(Observation::success(&ghost, json!(null))),
            None,
        )
        .await
        .unwrap();

        let state = project(&log);
        assert_eq!(state.current_status(), ConversationStatus::Error);
        assert_eq!(state.inconsistencies().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_observation_is_an_error() {
        let log = log();
        let action = click("#a");
        log.append(EventDraft::action(action.clone()), None).await.unwrap();
        for _ in 0..2 {
            log.append(
                EventDraft::observation(Observation::success(&action, json!("ok"))),
                None,
            )
            .await
            .unwrap();
        }

        let state = project(&log);
        assert_eq!(state.current_status(), ConversationStatus::Error);
        assert!(state.observation_for(&action.id).unwrap().success);
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let log = log();
        log.append(EventDraft::status(ConversationStatus::Success, None), None)
            .await
            .unwrap();
        log.append(
            EventDraft::status(ConversationStatus::Running, Some("again".into())),
            None,
        )
        .await
        .unwrap();
        assert_eq!(project(&log).current_status(), ConversationStatus::Success);
    }

    #[tokio::test]
    async fn incremental_fold_equals_replay() {
        let log = log();
        let mut incremental = ConversationState::new();
        let action = click("#go");
        let drafts = vec![
            EventDraft::user_message("log in"),
            EventDraft::action(action.clone()),
            EventDraft::status(ConversationStatus::WaitingForConfirmation, None),
            EventDraft::observation(Observation::success(&action, json!("clicked"))),
            EventDraft::state(StateUpdate::AssertionRegistered {
                text: "Welcome back".into(),
            }),
            EventDraft::agent_message("done?"),
        ];
        for draft in drafts {
            log.append(draft, None).await.unwrap();
            let from = incremental.applied_version();
            let slice = log.slice(from, log.version());
            incremental.apply_all(slice.iter()).unwrap();
        }

        let replayed = project(&log);
        assert_eq!(incremental, replayed);
        assert_eq!(replayed.current_status(), ConversationStatus::Running);
        assert_eq!(replayed.pending_assertions(), ["Welcome back".to_string()]);
        assert!(replayed.awaiting_user());
    }

    #[tokio::test]
    async fn user_reply_clears_awaiting() {
        let log = log();
        log.append(EventDraft::agent_message("which account?"), None)
            .await
            .unwrap();
        assert!(project(&log).awaiting_user());
        log.append(EventDraft::user_message("the admin one"), None)
            .await
            .unwrap();
        let state = project(&log);
        assert!(!state.awaiting_user());
        assert_eq!(state.last_user_message(), Some("the admin one"));
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let log = log();
        log.append(
            EventDraft::state(StateUpdate::Paused {
                reason: "operator".into(),
            }),
            None,
        )
        .await
        .unwrap();
        assert_eq!(project(&log).pause_reason(), Some("operator"));
        log.append(EventDraft::state(StateUpdate::Resumed), None)
            .await
            .unwrap();
        assert!(!project(&log).is_paused());
    }

    #[tokio::test]
    async fn retried_failure_is_resolved() {
        let log = log();
        let flaky = click("#save");
        let again = click("#save");
        let other = click("#cancel");
        log.append(EventDraft::action(flaky.clone()), None).await.unwrap();
        log.append(
            EventDraft::observation(Observation::failure(&flaky, ErrorKind::Timeout, "slow")),
            None,
        )
        .await
        .unwrap();
        log.append(EventDraft::action(again.clone()), None).await.unwrap();
        log.append(
            EventDraft::observation(Observation::success(&again, json!("ok"))),
            None,
        )
        .await
        .unwrap();
        assert!(project(&log).first_unresolved_failure().is_none());

        log.append(EventDraft::action(other.clone()), None).await.unwrap();
        log.append(
            EventDraft::observation(Observation::failure(
                &other,
                ErrorKind::ElementNotFound,
                "missing",
            )),
            None,
        )
        .await
        .unwrap();
        let state = project(&log);
        let (action, observation) = state.first_unresolved_failure().unwrap();
        assert_eq!(action.id, other.id);
        assert_eq!(observation.error_kind, Some(ErrorKind::ElementNotFound));
    }

    #[test]
    fn gaps_are_rejected() {
        let mut state = ConversationState::new();
        let event = Event {
            id: soulbrowser_core_types::EventId::new(),
            index: 4,
            timestamp: chrono::Utc::now(),
            source: EventSource::User,
            kind: EventKind::Message(soulbrowser_event_store::MessagePayload {
                content: "late".into(),
            }),
        };
        assert_eq!(
            state.apply(&event),
            Err(StateError::OutOfOrder {
                expected: 0,
                found: 4
            })
        );
    }
}
