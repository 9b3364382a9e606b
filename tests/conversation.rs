use std::sync::Arc;
use std::time::Duration;

use action_primitives::{
    ActionExecutor, ArgField, ArgKind, ArgSchema, ToolArtifact, ToolFailure, ToolOutput,
    ToolRegistry, ToolSpec,
};
use agent_core::{StepContext, FINISH_TOOL};
use perceiver_structural::{query, DomTree};
use serde_json::json;
use soulbrowser_event_store::{EventDraft, EventKind, EventLog};
use soulbrowser_state_center::ConversationState;
use soulbrowser_testkit::{
    heal_audit_location, Conversation, ConversationId, ConversationStatus, ErrorKind, IdleReason,
    MemoryWorkspace, ReasoningResponse, ScriptedReasoning, ScriptedReply, StepOutcome, Testkit,
    TestkitConfig, TestkitError, ToolCallRequest, Workspace,
};
use tempfile::TempDir;

const PAGE: &str = r#"<html><body>
  <h1>Checkout</h1>
  <form id="checkout">
    <input id="email" name="email" data-testid="email-input" placeholder="Email">
    <button type="submit" class="btn submit" data-testid="submit">Submit</button>
  </form>
  <p>Order placed successfully</p>
</body></html>"#;

fn registry() -> Arc<ToolRegistry> {
    let tree = Arc::new(DomTree::parse_html(PAGE));
    ToolRegistry::builder()
        .with_fn(
            ToolSpec::new(
                "click",
                "Click an element",
                ArgSchema::new(vec![ArgField::required("selector", ArgKind::String)]),
            ),
            move |action, _cancel| {
                let tree = Arc::clone(&tree);
                async move {
                    let selector = action.selector().unwrap_or_default().to_string();
                    let matches = match query(&tree, &selector) {
                        Ok(matches) => matches,
                        Err(err) => return Err(ToolFailure::Declared(err.to_string())),
                    };
                    match matches.len() {
                        1 => Ok(ToolOutput::new(json!({ "clicked": selector }))),
                        0 => Err(ToolFailure::ElementNotFound(selector)),
                        n => Err(ToolFailure::Ambiguous { selector, matches: n }),
                    }
                }
            },
        )
        .with_fn(
            ToolSpec::new("capture_dom", "Capture the page", ArgSchema::default()),
            |_action, _cancel| async move {
                Ok(ToolOutput::default().with_artifact(ToolArtifact::dom_snapshot(PAGE)))
            },
        )
        .with_fn(
            ToolSpec::new("hang", "Wait until interrupted", ArgSchema::default()),
            |_action, cancel| async move {
                cancel.cancelled().await;
                Ok(ToolOutput::default())
            },
        )
        .build()
        .unwrap()
}

fn calls(calls: Vec<ToolCallRequest>) -> ScriptedReply {
    ScriptedReply::Respond(ReasoningResponse::ToolCalls(calls))
}

fn text(reply: &str) -> ScriptedReply {
    ScriptedReply::Respond(ReasoningResponse::Text(reply.into()))
}

fn click(selector: &str) -> ToolCallRequest {
    ToolCallRequest::new("click", json!({ "selector": selector }))
}

fn finish(success: bool, summary: &str) -> ToolCallRequest {
    ToolCallRequest::new(FINISH_TOOL, json!({ "success": success, "summary": summary }))
}

fn testkit(
    config: TestkitConfig,
    replies: Vec<ScriptedReply>,
) -> (Testkit, Arc<ScriptedReasoning>, Arc<MemoryWorkspace>) {
    let reasoning = Arc::new(ScriptedReasoning::new(replies));
    let workspace = Arc::new(MemoryWorkspace::new());
    let kit = Testkit::new(config, registry(), reasoning.clone(), workspace.clone()).unwrap();
    (kit, reasoning, workspace)
}

#[tokio::test]
async fn broken_selector_is_healed_and_journaled() {
    let (kit, _reasoning, workspace) = testkit(
        TestkitConfig::default(),
        vec![
            calls(vec![ToolCallRequest::new("capture_dom", json!({}))]),
            calls(vec![click("#submit-btn-old")]),
            calls(vec![finish(true, "form submitted")]),
        ],
    );
    let conversation = kit.open(ConversationId::named("checkout")).unwrap();
    conversation.send_user_message("submit the checkout form").await.unwrap();

    let status = conversation.run(10).await.unwrap();
    assert_eq!(status, ConversationStatus::Success);

    let state = conversation.snapshot();
    assert_eq!(state.heal_audit().len(), 1);
    let audit = &state.heal_audit()[0];
    assert_eq!(audit.old_selector, "#submit-btn-old");
    assert_eq!(audit.new_selector, "button[data-testid='submit']");
    assert!(state.first_unresolved_failure().is_none());

    let journal = workspace
        .read(&heal_audit_location(conversation.id()))
        .await
        .unwrap();
    let lines: Vec<&str> = std::str::from_utf8(&journal).unwrap().lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("button[data-testid='submit']"));

    assert!(conversation.failure_report().is_none());
    assert_eq!(conversation.write_failure_report().await.unwrap(), None);
}

#[tokio::test]
async fn replayed_state_matches_the_live_projection() {
    let (kit, _reasoning, _workspace) = testkit(
        TestkitConfig::default(),
        vec![
            calls(vec![click("#email"), click("button[data-testid='submit']")]),
            text("Submitted. Anything else?"),
        ],
    );
    let conversation = kit.start().unwrap();
    conversation.send_user_message("fill in the form").await.unwrap();
    conversation.run(5).await.unwrap();

    let live = conversation.snapshot();
    assert!(live.awaiting_user());
    let replayed = ConversationState::replay(conversation.events()).unwrap();
    assert_eq!(replayed, live);

    // Every action got exactly one observation.
    let events = conversation.events();
    let actions: Vec<_> = events.iter().filter_map(|event| event.as_action()).collect();
    let observations: Vec<_> = events
        .iter()
        .filter_map(|event| event.as_observation())
        .collect();
    assert_eq!(actions.len(), 2);
    for action in actions {
        assert_eq!(
            observations
                .iter()
                .filter(|observation| observation.action_id == action.id)
                .count(),
            1
        );
    }
    assert!(live.inconsistencies().is_empty());
}

#[tokio::test]
async fn failed_run_writes_a_failure_report() {
    let (kit, _reasoning, workspace) = testkit(
        TestkitConfig::default(),
        vec![
            calls(vec![ToolCallRequest::new("click", json!({}))]),
            calls(vec![finish(false, "could not click anything")]),
        ],
    );
    let conversation = kit.open(ConversationId::named("failing run")).unwrap();
    conversation.send_user_message("click the button").await.unwrap();
    assert_eq!(conversation.run(10).await.unwrap(), ConversationStatus::Error);

    let report = conversation.failure_report().expect("report");
    assert_eq!(report.status_reason.as_deref(), Some("could not click anything"));
    assert_eq!(report.tool.as_deref(), Some("click"));
    assert_eq!(report.error_kind, Some(ErrorKind::ToolError));

    let location = conversation.write_failure_report().await.unwrap().unwrap();
    assert_eq!(location, "reports/failing_run-failure.json");
    assert!(workspace.exists(&location).await.unwrap());
}

#[tokio::test]
async fn confirmation_mode_waits_for_confirm_or_reject() {
    let mut config = TestkitConfig::default();
    config.agent.step.confirmation_mode = true;
    let (kit, _reasoning, _workspace) = testkit(
        config,
        vec![
            calls(vec![click("#email")]),
            calls(vec![click("button[data-testid='submit']")]),
        ],
    );
    let conversation = kit.start().unwrap();
    assert!(matches!(
        conversation.confirm().await,
        Err(TestkitError::NothingPending)
    ));
    conversation.send_user_message("submit the form").await.unwrap();

    assert!(matches!(conversation.step().await.unwrap(), StepOutcome::Proposed(_)));
    assert_eq!(conversation.status(), ConversationStatus::WaitingForConfirmation);
    assert_eq!(
        conversation.step().await.unwrap(),
        StepOutcome::Idle(IdleReason::AwaitingConfirmation)
    );

    let held = conversation.pending_actions();
    conversation.confirm().await.unwrap();
    assert_eq!(conversation.status(), ConversationStatus::Running);
    assert!(conversation.snapshot().observation_for(&held[0].id).unwrap().success);

    assert!(matches!(conversation.step().await.unwrap(), StepOutcome::Proposed(_)));
    let held = conversation.pending_actions();
    conversation.reject("not this one").await.unwrap();
    let state = conversation.snapshot();
    let rejected = state.observation_for(&held[0].id).unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.error_kind, Some(ErrorKind::ToolError));
    assert!(!state.has_pending());
    assert_eq!(state.current_status(), ConversationStatus::Running);
}

#[tokio::test]
async fn pause_interrupts_reasoning_until_resumed() {
    let (kit, reasoning, _workspace) = testkit(TestkitConfig::default(), vec![ScriptedReply::Stall]);
    let conversation = kit.start().unwrap();
    conversation.send_user_message("take your time").await.unwrap();

    let (outcome, paused) = tokio::join!(conversation.step(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        conversation.pause("operator break").await
    });
    paused.unwrap();
    assert_eq!(outcome.unwrap(), StepOutcome::Idle(IdleReason::Paused));
    assert!(conversation.snapshot().is_paused());
    assert_eq!(
        conversation.step().await.unwrap(),
        StepOutcome::Idle(IdleReason::Paused)
    );

    reasoning.push(text("Done waiting.")).await;
    conversation.resume().await.unwrap();
    assert!(!conversation.snapshot().is_paused());
    assert!(matches!(conversation.step().await.unwrap(), StepOutcome::Replied(_)));
    assert_eq!(reasoning.calls().await, 2);
}

#[tokio::test]
async fn pause_times_out_the_running_tool_and_holds_the_rest() {
    let (kit, _reasoning, _workspace) = testkit(
        TestkitConfig::default(),
        vec![calls(vec![
            ToolCallRequest::new("hang", json!({})),
            click("#email"),
        ])],
    );
    let conversation = kit.start().unwrap();
    conversation.send_user_message("wait, then fill the form").await.unwrap();
    assert!(matches!(conversation.step().await.unwrap(), StepOutcome::Proposed(_)));
    let batch = conversation.pending_actions();
    assert_eq!(batch.len(), 2);

    let (outcome, paused) = tokio::join!(conversation.step(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        conversation.pause("operator break").await
    });
    paused.unwrap();
    assert!(matches!(outcome.unwrap(), StepOutcome::Executed(_)));

    let state = conversation.snapshot();
    assert!(state.is_paused());
    let interrupted = state.observation_for(&batch[0].id).unwrap();
    assert_eq!(interrupted.error_kind, Some(ErrorKind::Timeout));
    assert!(state.observation_for(&batch[1].id).is_none());
    assert_eq!(conversation.pending_actions(), vec![batch[1].clone()]);

    conversation.resume().await.unwrap();
    assert!(matches!(conversation.step().await.unwrap(), StepOutcome::Executed(_)));
    let state = conversation.snapshot();
    assert!(state.observation_for(&batch[1].id).unwrap().success);
    assert!(!state.has_pending());
}

#[tokio::test]
async fn cancel_interrupts_the_running_tool() {
    let (kit, _reasoning, _workspace) = testkit(
        TestkitConfig::default(),
        vec![calls(vec![
            ToolCallRequest::new("hang", json!({})),
            click("#email"),
        ])],
    );
    let conversation = kit.start().unwrap();
    conversation.send_user_message("wait forever").await.unwrap();
    conversation.step().await.unwrap();
    let batch = conversation.pending_actions();

    let (outcome, cancelled) = tokio::join!(conversation.step(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        conversation.cancel("shutdown").await
    });
    cancelled.unwrap();
    outcome.unwrap();

    let state = conversation.snapshot();
    assert_eq!(state.current_status(), ConversationStatus::Error);
    assert!(!state.has_pending());
    for action in &batch {
        let observation = state.observation_for(&action.id).unwrap();
        assert_eq!(observation.error_kind, Some(ErrorKind::Timeout));
    }
    assert_eq!(
        state.observation_for(&batch[1].id).unwrap().error_message.as_deref(),
        Some("cancelled: shutdown")
    );
}

#[tokio::test]
async fn events_appended_through_another_handle_are_folded_before_mutating() {
    let log = EventLog::in_memory(ConversationId::named("shared"));
    let executor = ActionExecutor::new(registry());
    let ctx = StepContext::new(executor, Arc::new(ScriptedReasoning::new([text("Hello.")])));
    let conversation = Conversation::open(log.clone(), ctx).unwrap();

    log.append(EventDraft::user_message("written elsewhere"), None)
        .await
        .unwrap();
    assert_eq!(conversation.version(), 1);
    assert_eq!(conversation.snapshot().applied_version(), 0);

    conversation.send_user_message("written here").await.unwrap();
    let state = conversation.snapshot();
    assert_eq!(state.applied_version(), 2);
    assert_eq!(state.messages().len(), 2);
    assert_eq!(state.last_user_message(), Some("written here"));
    assert!(matches!(conversation.step().await.unwrap(), StepOutcome::Replied(_)));
    assert_eq!(conversation.events().len(), 3);
}

#[tokio::test]
async fn cancel_answers_every_pending_action() {
    let mut config = TestkitConfig::default();
    config.agent.step.confirmation_mode = true;
    let (kit, _reasoning, _workspace) = testkit(
        config,
        vec![calls(vec![click("#email"), click("#checkout")])],
    );
    let conversation = kit.start().unwrap();
    conversation.send_user_message("fill the form").await.unwrap();
    conversation.step().await.unwrap();
    let held = conversation.pending_actions();
    assert_eq!(held.len(), 2);

    conversation.cancel("shutdown").await.unwrap();
    let state = conversation.snapshot();
    assert_eq!(state.current_status(), ConversationStatus::Error);
    assert!(!state.has_pending());
    for action in &held {
        let observation = state.observation_for(&action.id).unwrap();
        assert_eq!(observation.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(observation.error_message.as_deref(), Some("cancelled: shutdown"));
    }

    assert_eq!(
        conversation.step().await.unwrap(),
        StepOutcome::Idle(IdleReason::Terminal(ConversationStatus::Error))
    );
    assert!(matches!(
        conversation.send_user_message("still there?").await,
        Err(TestkitError::Terminal(ConversationStatus::Error))
    ));
}

#[tokio::test]
async fn concurrent_mutations_commit_in_order() {
    let (kit, _reasoning, _workspace) = testkit(TestkitConfig::default(), Vec::new());
    let conversation = kit.start().unwrap();
    let (a, b, c) = tokio::join!(
        conversation.send_user_message("one"),
        conversation.send_user_message("two"),
        conversation.register_assertion("Order placed"),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let indices: Vec<u64> = conversation
        .events()
        .iter()
        .map(|event| event.index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
    let state = conversation.snapshot();
    assert_eq!(state.applied_version(), 3);
    assert_eq!(state.messages().len(), 2);
    assert_eq!(state.pending_assertions(), ["Order placed".to_string()]);
}

#[tokio::test]
async fn journaled_conversation_is_restored() {
    let dir = TempDir::new().unwrap();
    let mut config = TestkitConfig::default();
    config.event_store.journal.enabled = true;
    config.event_store.journal.root = dir.path().join("events");
    config.workspace.root = dir.path().join("workspace");
    let id = ConversationId::named("restore-me");

    {
        let reasoning = Arc::new(ScriptedReasoning::new([text("Which account?")]));
        let kit = Testkit::with_fs_workspace(config.clone(), registry(), reasoning)
            .await
            .unwrap();
        let conversation = kit.open(id.clone()).unwrap();
        conversation.send_user_message("log in").await.unwrap();
        conversation.run(3).await.unwrap();
        assert!(conversation.snapshot().awaiting_user());
    }
    assert!(dir.path().join("workspace/reports").is_dir());

    let reasoning = Arc::new(ScriptedReasoning::new([calls(vec![finish(true, "logged in")])]));
    let kit = Testkit::with_fs_workspace(config, registry(), reasoning)
        .await
        .unwrap();
    let conversation = kit.open(id).unwrap();
    let restored = conversation.snapshot();
    assert_eq!(restored.applied_version(), 2);
    assert!(restored.awaiting_user());
    assert_eq!(restored.last_user_message(), Some("log in"));

    conversation.send_user_message("use the admin account").await.unwrap();
    assert_eq!(conversation.run(3).await.unwrap(), ConversationStatus::Success);
    let events = conversation.events();
    assert!(matches!(events[2].kind, EventKind::Message(_)));
    assert_eq!(events.last().map(|event| event.index), Some(4));
}

#[tokio::test]
async fn configured_skills_reach_the_reasoning_context() {
    let config = TestkitConfig::from_yaml_str(
        r#"
agent:
  skills:
    - name: checkout
      pattern: "checkout"
      behavior:
        guidance: "Confirm the order banner."
"#,
    )
    .unwrap();
    let (kit, reasoning, _workspace) = testkit(config, vec![text("Looks fine.")]);
    let conversation = kit.start().unwrap();
    conversation.send_user_message("Check the CHECKOUT page").await.unwrap();
    conversation.step().await.unwrap();

    let contexts = reasoning.contexts().await;
    assert_eq!(contexts[0].guidance, vec!["Confirm the order banner.".to_string()]);
    assert_eq!(contexts[0].active_skills, vec!["checkout".to_string()]);
}
