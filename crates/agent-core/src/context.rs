//! Context assembly: what the reasoning service sees for one decision.

use std::sync::Arc;

use action_primitives::{ArgField, ArgKind, ArgSchema, ArtifactSink, ToolRegistry, ToolSpec};
use perceiver_structural::{CondensedDOM, RawPage};
use soulbrowser_state_center::ConversationState;
use tracing::{debug, warn};

use crate::config::StepConfig;
use crate::model::{ActionSummary, ConversationRole, ConversationTurn, ReasoningContext};
use crate::skills::{SkillActivation, SkillBehavior, SkillMatcher};

/// Reserved tool the reasoning service calls to end the conversation.
pub const FINISH_TOOL: &str = "finish";

pub fn finish_tool_spec() -> ToolSpec {
    ToolSpec::new(
        FINISH_TOOL,
        "End the test and report whether it passed",
        ArgSchema::new(vec![
            ArgField::required("success", ArgKind::Boolean)
                .describe("Whether every check in the task passed"),
            ArgField::optional("summary", ArgKind::String)
                .describe("Short account of what was verified"),
        ]),
    )
}

/// Builds the reasoning context from the conversation view.
pub async fn assemble_context(
    view: &ConversationState,
    sink: Option<&Arc<dyn ArtifactSink>>,
    activations: &[SkillActivation],
    config: &StepConfig,
) -> ReasoningContext {
    let messages = view
        .messages()
        .iter()
        .filter_map(|message| {
            ConversationRole::from_source(message.source).map(|role| ConversationTurn {
                role,
                content: message.content.clone(),
            })
        })
        .collect();
    let recent_actions = view
        .recent_pairs(config.recent_pairs)
        .into_iter()
        .map(|(action, observation)| ActionSummary::from_pair(action, observation))
        .collect();
    let guidance = activations
        .iter()
        .filter_map(|skill| match &skill.behavior {
            SkillBehavior::Guidance(text) => Some(text.clone()),
            SkillBehavior::ExposeTools(_) => None,
        })
        .collect();

    ReasoningContext {
        messages,
        recent_actions,
        page: load_page(view, sink, config).await,
        pending_assertions: view.pending_assertions().to_vec(),
        guidance,
        active_skills: activations.iter().map(|skill| skill.name.clone()).collect(),
    }
}

/// Text the skill table is matched against.
pub fn skill_context_text(view: &ConversationState) -> String {
    let mut text = view.last_user_message().unwrap_or_default().to_string();
    for assertion in view.pending_assertions() {
        text.push('\n');
        text.push_str(assertion);
    }
    text
}

/// Registry tools minus gated ones, plus those active skills expose, plus
/// the finish tool. Sorted by name.
pub fn offered_tools(
    registry: &ToolRegistry,
    skills: &dyn SkillMatcher,
    activations: &[SkillActivation],
) -> Vec<ToolSpec> {
    let gated = skills.gated_tools();
    let exposed: Vec<&String> = activations
        .iter()
        .filter_map(|skill| match &skill.behavior {
            SkillBehavior::ExposeTools(tools) => Some(tools.iter()),
            SkillBehavior::Guidance(_) => None,
        })
        .flatten()
        .collect();
    let mut tools: Vec<ToolSpec> = registry
        .specs()
        .into_iter()
        .filter(|spec| spec.name != FINISH_TOOL)
        .filter(|spec| !gated.contains(&spec.name) || exposed.contains(&&spec.name))
        .cloned()
        .collect();
    tools.push(finish_tool_spec());
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    tools
}

async fn load_page(
    view: &ConversationState,
    sink: Option<&Arc<dyn ArtifactSink>>,
    config: &StepConfig,
) -> Option<CondensedDOM> {
    let artifact = view.latest_dom_snapshot()?;
    let Some(sink) = sink else {
        debug!(location = %artifact.location, "no artifact sink; page omitted");
        return None;
    };
    let bytes = match sink.load(&artifact.location).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(location = %artifact.location, error = %err, "DOM snapshot unavailable");
            return None;
        }
    };
    let options = config
        .condense
        .clone()
        .with_assertions(view.pending_assertions().iter().cloned());
    match RawPage::from_bytes(&bytes).and_then(|page| page.condense(&options)) {
        Ok(condensed) => {
            debug!(
                location = %artifact.location,
                input_bytes = condensed.input_bytes,
                output_bytes = condensed.output_bytes,
                ratio = condensed.size_reduction_ratio,
                "page condensed for reasoning"
            );
            Some(condensed)
        }
        Err(err) => {
            warn!(location = %artifact.location, error = %err, "DOM snapshot could not be condensed");
            None
        }
    }
}
