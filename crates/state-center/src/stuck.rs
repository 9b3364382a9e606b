use std::fmt;

use soulbrowser_core_types::EventSource;

use crate::ConversationState;

/// Flags conversations that keep repeating themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StuckDetector {
    threshold: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StuckReason {
    RepeatedAction { tool: String, count: usize },
    RepeatedMessage { count: usize },
}

impl fmt::Display for StuckReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StuckReason::RepeatedAction { tool, count } => write!(
                f,
                "the same {tool} action produced the same outcome {count} times in a row"
            ),
            StuckReason::RepeatedMessage { count } => {
                write!(f, "the agent repeated the same message {count} times")
            }
        }
    }
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

impl StuckDetector {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(2),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn check(&self, state: &ConversationState) -> Option<StuckReason> {
        let pairs = state.recent_pairs(self.threshold);
        if pairs.len() == self.threshold {
            let (first_action, first_obs) = pairs[0];
            let repeated = pairs.iter().all(|(action, obs)| {
                action.tool_name == first_action.tool_name
                    && action.arguments == first_action.arguments
                    && obs.success == first_obs.success
                    && obs.error_kind == first_obs.error_kind
            });
            if repeated {
                return Some(StuckReason::RepeatedAction {
                    tool: first_action.tool_name.clone(),
                    count: self.threshold,
                });
            }
        }

        let agent_messages: Vec<&str> = state
            .messages()
            .iter()
            .rev()
            .filter(|message| message.source == EventSource::Agent)
            .take(self.threshold)
            .map(|message| message.content.as_str())
            .collect();
        if agent_messages.len() == self.threshold
            && agent_messages.iter().all(|text| *text == agent_messages[0])
        {
            return Some(StuckReason::RepeatedMessage {
                count: self.threshold,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use soulbrowser_core_types::{Action, ConversationId, ErrorKind, Observation};
    use soulbrowser_event_store::{EventDraft, EventLog};

    async fn click_and_fail(log: &EventLog, selector: &str) {
        let action = Action::new("click", json!({ "selector": selector }));
        log.append(EventDraft::action(action.clone()), None)
            .await
            .unwrap();
        log.append(
            EventDraft::observation(Observation::failure(
                &action,
                ErrorKind::ElementNotFound,
                "missing",
            )),
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn repeated_failures_are_stuck() {
        let log = EventLog::in_memory(ConversationId::named("stuck"));
        let detector = StuckDetector::default();
        for _ in 0..2 {
            click_and_fail(&log, "#same").await;
        }
        let state = ConversationState::replay(log.snapshot()).unwrap();
        assert_eq!(detector.check(&state), None);

        click_and_fail(&log, "#same").await;
        let state = ConversationState::replay(log.snapshot()).unwrap();
        assert_eq!(
            detector.check(&state),
            Some(StuckReason::RepeatedAction {
                tool: "click".into(),
                count: 3
            })
        );
    }

    #[tokio::test]
    async fn varied_actions_are_not_stuck() {
        let log = EventLog::in_memory(ConversationId::named("varied"));
        click_and_fail(&log, "#a").await;
        click_and_fail(&log, "#b").await;
        click_and_fail(&log, "#a").await;
        let state = ConversationState::replay(log.snapshot()).unwrap();
        assert_eq!(StuckDetector::default().check(&state), None);
    }

    #[tokio::test]
    async fn repeated_agent_messages_are_stuck() {
        let log = EventLog::in_memory(ConversationId::named("echo"));
        for _ in 0..3 {
            log.append(EventDraft::agent_message("I cannot find it"), None)
                .await
                .unwrap();
            log.append(EventDraft::user_message("try again"), None)
                .await
                .unwrap();
        }
        let state = ConversationState::replay(log.snapshot()).unwrap();
        assert_eq!(
            StuckDetector::default().check(&state),
            Some(StuckReason::RepeatedMessage { count: 3 })
        );
    }
}
