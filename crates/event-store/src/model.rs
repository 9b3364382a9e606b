use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use soulbrowser_core_types::{
    Action, ActionId, ConversationStatus, EventId, EventSource, Observation,
};

/// Immutable record of something that happened during a conversation.
///
/// `id`, `index` and `timestamp` are stamped by the log at append time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn as_action(&self) -> Option<&Action> {
        match &self.kind {
            EventKind::Action(action) => Some(action),
            _ => None,
        }
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match &self.kind {
            EventKind::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn as_state_update(&self) -> Option<&StateUpdate> {
        match &self.kind {
            EventKind::StateUpdate(update) => Some(update),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessagePayload> {
        match &self.kind {
            EventKind::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    Message(MessagePayload),
    Action(Action),
    Observation(Observation),
    StateUpdate(StateUpdate),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Message(_) => "message",
            EventKind::Action(_) => "action",
            EventKind::Observation(_) => "observation",
            EventKind::StateUpdate(_) => "state_update",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub content: String,
}

/// Selector-healing audit record: which locator replaced which.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealAudit {
    pub action_id: ActionId,
    pub old_selector: String,
    pub new_selector: String,
    pub strategy: String,
    pub attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateUpdate {
    StatusChanged {
        status: ConversationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SelectorHealed(HealAudit),
    Paused {
        reason: String,
    },
    Resumed,
    AssertionRegistered {
        text: String,
    },
}

/// Event content before the log stamps identity and position.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub source: EventSource,
    pub kind: EventKind,
}

impl EventDraft {
    pub fn new(source: EventSource, kind: EventKind) -> Self {
        Self { source, kind }
    }

    pub fn user_message(content: impl Into<String>) -> Self {
        Self::new(
            EventSource::User,
            EventKind::Message(MessagePayload {
                content: content.into(),
            }),
        )
    }

    pub fn agent_message(content: impl Into<String>) -> Self {
        Self::new(
            EventSource::Agent,
            EventKind::Message(MessagePayload {
                content: content.into(),
            }),
        )
    }

    pub fn action(action: Action) -> Self {
        Self::new(EventSource::Agent, EventKind::Action(action))
    }

    pub fn observation(observation: Observation) -> Self {
        Self::new(EventSource::Environment, EventKind::Observation(observation))
    }

    pub fn state(update: StateUpdate) -> Self {
        Self::new(EventSource::Environment, EventKind::StateUpdate(update))
    }

    pub fn status(status: ConversationStatus, reason: Option<String>) -> Self {
        Self::state(StateUpdate::StatusChanged { status, reason })
    }

    pub(crate) fn stamp(self, index: u64) -> Event {
        Event {
            id: EventId::new(),
            index,
            timestamp: Utc::now(),
            source: self.source,
            kind: self.kind,
        }
    }
}
