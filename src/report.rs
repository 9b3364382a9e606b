//! Failure reports and the selector-healing audit journal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{ActionId, ConversationId, ConversationStatus, ErrorKind};
use soulbrowser_event_store::{EventLog, HealAudit, StateUpdate};
use soulbrowser_state_center::ConversationState;
use tracing::{debug, info};

use crate::errors::TestkitResult;
use crate::workspace::{Workspace, GENERATED_DIR, REPORTS_DIR};

/// Why a conversation failed, for humans and CI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub conversation: ConversationId,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub heal_audit: Vec<HealAudit>,
    pub generated_at: DateTime<Utc>,
}

impl FailureReport {
    /// `None` for a conversation with no unresolved failure that did not end
    /// in `error` or `stuck`.
    pub fn from_state(conversation: &ConversationId, state: &ConversationState) -> Option<Self> {
        let failure = state.first_unresolved_failure();
        let failed_status = matches!(
            state.current_status(),
            ConversationStatus::Error | ConversationStatus::Stuck
        );
        if failure.is_none() && !failed_status {
            return None;
        }
        let mut report = Self {
            conversation: conversation.clone(),
            status: state.current_status(),
            status_reason: state.status_reason().map(str::to_string),
            action_id: None,
            tool: None,
            selector: None,
            error_kind: None,
            error_message: None,
            heal_audit: state.heal_audit().to_vec(),
            generated_at: Utc::now(),
        };
        if let Some((action, observation)) = failure {
            report.action_id = Some(action.id.clone());
            report.tool = Some(action.tool_name.clone());
            report.selector = action.selector().map(str::to_string);
            report.error_kind = observation.error_kind;
            report.error_message = observation.error_message.clone();
        }
        Some(report)
    }

    /// Workspace path this report is written to.
    pub fn location(conversation: &ConversationId) -> String {
        format!("{REPORTS_DIR}/{}-failure.json", file_stem(conversation))
    }

    pub async fn write_to(&self, workspace: &dyn Workspace) -> TestkitResult<String> {
        let location = Self::location(&self.conversation);
        let body = serde_json::to_vec_pretty(self)?;
        workspace.write(&location, &body).await?;
        info!(
            conversation = %self.conversation,
            location = %location,
            error_kind = self.error_kind.map(|kind| kind.as_str()).unwrap_or("none"),
            "failure report written"
        );
        Ok(location)
    }
}

/// Workspace path of the selector-healing journal for `conversation`.
pub fn heal_audit_location(conversation: &ConversationId) -> String {
    format!(
        "{GENERATED_DIR}/selector-healing/{}.jsonl",
        file_stem(conversation)
    )
}

fn file_stem(conversation: &ConversationId) -> String {
    conversation
        .as_str()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Collects `selector_healed` updates through a post hook on the log and
/// appends them to the conversation's JSON-lines journal on flush.
///
/// Hooks run synchronously under the log's writer lock, so the hook only
/// queues; [`HealAuditJournal::flush`] does the I/O.
#[derive(Clone)]
pub struct HealAuditJournal {
    location: String,
    queued: Arc<Mutex<Vec<HealAudit>>>,
}

impl HealAuditJournal {
    pub fn attach(log: &EventLog) -> Self {
        let queued: Arc<Mutex<Vec<HealAudit>>> = Arc::default();
        let sink = Arc::clone(&queued);
        log.register_post_hook_fn(move |event| {
            if let Some(StateUpdate::SelectorHealed(audit)) = event.as_state_update() {
                sink.lock().push(audit.clone());
            }
        });
        Self {
            location: heal_audit_location(log.conversation()),
            queued,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Writes queued audits; returns how many were written.
    pub async fn flush(&self, workspace: &dyn Workspace) -> TestkitResult<usize> {
        let pending = std::mem::take(&mut *self.queued.lock());
        if pending.is_empty() {
            return Ok(0);
        }
        let mut body = Vec::new();
        for audit in &pending {
            serde_json::to_writer(&mut body, audit)?;
            body.push(b'\n');
        }
        if let Err(err) = workspace.append(&self.location, &body).await {
            // Put them back so the next flush retries.
            let mut queued = self.queued.lock();
            let later = std::mem::replace(&mut *queued, pending);
            queued.extend(later);
            return Err(err);
        }
        debug!(location = %self.location, count = pending.len(), "heal audits journaled");
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::MemoryWorkspace;
    use serde_json::json;
    use soulbrowser_core_types::{Action, Observation};
    use soulbrowser_event_store::EventDraft;

    async fn log_with(drafts: Vec<EventDraft>) -> (EventLog, ConversationState) {
        let log = EventLog::in_memory(ConversationId::named("checkout/run 1"));
        let journal = HealAuditJournal::attach(&log);
        log.append_batch(drafts, None).await.unwrap();
        let workspace = MemoryWorkspace::new();
        journal.flush(&workspace).await.unwrap();
        let state = ConversationState::replay(log.snapshot()).unwrap();
        (log, state)
    }

    fn audit(action: &Action) -> HealAudit {
        HealAudit {
            action_id: action.id.clone(),
            old_selector: "#old".into(),
            new_selector: "#new".into(),
            strategy: "test_id".into(),
            attempts: 1,
        }
    }

    #[tokio::test]
    async fn report_names_first_unresolved_failure() {
        let click = Action::new("click", json!({ "selector": "#buy" }));
        let type_text = Action::new("type_text", json!({ "selector": "#q", "text": "x" }));
        let (log, state) = log_with(vec![
            EventDraft::action(click.clone()),
            EventDraft::action(type_text.clone()),
            EventDraft::observation(Observation::failure(
                &click,
                ErrorKind::ElementNotFound,
                "no element matches #buy",
            )),
            EventDraft::observation(Observation::success(&type_text, json!("typed"))),
            EventDraft::state(StateUpdate::SelectorHealed(audit(&type_text))),
            EventDraft::status(ConversationStatus::Error, Some("gave up".into())),
        ])
        .await;

        let report = FailureReport::from_state(log.conversation(), &state).unwrap();
        assert_eq!(report.status, ConversationStatus::Error);
        assert_eq!(report.action_id.as_ref(), Some(&click.id));
        assert_eq!(report.selector.as_deref(), Some("#buy"));
        assert_eq!(report.error_kind, Some(ErrorKind::ElementNotFound));
        assert_eq!(report.heal_audit.len(), 1);

        let workspace = MemoryWorkspace::new();
        let location = report.write_to(&workspace).await.unwrap();
        assert_eq!(location, "reports/checkout_run_1-failure.json");
        let stored: FailureReport =
            serde_json::from_slice(&workspace.read(&location).await.unwrap()).unwrap();
        assert_eq!(stored, report);
    }

    #[tokio::test]
    async fn clean_runs_have_no_report() {
        let click = Action::new("click", json!({ "selector": "#ok" }));
        let (log, state) = log_with(vec![
            EventDraft::action(click.clone()),
            EventDraft::observation(Observation::success(&click, json!(null))),
            EventDraft::status(ConversationStatus::Success, None),
        ])
        .await;
        assert!(FailureReport::from_state(log.conversation(), &state).is_none());
    }

    #[tokio::test]
    async fn journal_appends_one_line_per_audit() {
        let log = EventLog::in_memory(ConversationId::named("heal"));
        let journal = HealAuditJournal::attach(&log);
        let workspace = MemoryWorkspace::new();
        let first = Action::new("click", json!({ "selector": "#a" }));
        let second = Action::new("click", json!({ "selector": "#b" }));

        log.append(EventDraft::state(StateUpdate::SelectorHealed(audit(&first))), None)
            .await
            .unwrap();
        assert_eq!(journal.flush(&workspace).await.unwrap(), 1);
        log.append(EventDraft::user_message("hi"), None).await.unwrap();
        log.append(EventDraft::state(StateUpdate::SelectorHealed(audit(&second))), None)
            .await
            .unwrap();
        assert_eq!(journal.flush(&workspace).await.unwrap(), 1);
        assert_eq!(journal.flush(&workspace).await.unwrap(), 0);

        assert_eq!(journal.location(), "generated/selector-healing/heal.jsonl");
        let body = String::from_utf8(workspace.read(journal.location()).await.unwrap()).unwrap();
        let lines: Vec<HealAudit> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, vec![audit(&first), audit(&second)]);
    }
}
