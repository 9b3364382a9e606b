//! Core types for selector recovery

use perceiver_structural::NodeId;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{ActionId, Observation};
use soulbrowser_event_store::HealAudit;

/// Candidate selector families, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    TestId,
    AriaLabel,
    Text,
    Css,
    Path,
}

impl CandidateKind {
    pub fn name(&self) -> &'static str {
        match self {
            CandidateKind::TestId => "test_id",
            CandidateKind::AriaLabel => "aria_label",
            CandidateKind::Text => "text",
            CandidateKind::Css => "css",
            CandidateKind::Path => "path",
        }
    }
}

/// Replacement selector proposed for a failed locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub selector: String,
    pub kind: CandidateKind,
    /// Similarity to the failed locator, `0.0..=1.0`.
    pub score: f64,
    /// Condensed element id (`e<N>`).
    pub element_id: String,
    pub node: NodeId,
}

/// Recovery knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Candidates validated per recovery.
    pub max_attempts: u32,
    /// Candidates generated per diagnosis.
    pub max_candidates: usize,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_candidates: 8,
        }
    }
}

impl HealingConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }
}

/// Book-keeping of one recovery, scoped to a single failing action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfHealingAttempt {
    pub action_id: ActionId,
    pub original_selector: String,
    /// Ranked best first.
    pub candidate_selectors: Vec<Candidate>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub resolved_selector: Option<String>,
}

impl SelfHealingAttempt {
    pub fn new(action_id: ActionId, original_selector: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            action_id,
            original_selector: original_selector.into(),
            candidate_selectors: Vec::new(),
            attempt_count: 0,
            max_attempts,
            resolved_selector: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealOutcome {
    /// The failure is not a missing element (or the action has no
    /// selector); the observation is returned untouched.
    NotApplicable(Observation),

    /// A candidate validated and the re-executed action succeeded.
    Resolved {
        observation: Observation,
        audit: HealAudit,
        attempt: SelfHealingAttempt,
    },

    /// No candidate worked; `observation` is the original failure.
    Exhausted {
        observation: Observation,
        attempt: SelfHealingAttempt,
    },
}

impl HealOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, HealOutcome::Resolved { .. })
    }

    pub fn observation(&self) -> &Observation {
        match self {
            HealOutcome::NotApplicable(observation)
            | HealOutcome::Resolved { observation, .. }
            | HealOutcome::Exhausted { observation, .. } => observation,
        }
    }

    pub fn audit(&self) -> Option<&HealAudit> {
        match self {
            HealOutcome::Resolved { audit, .. } => Some(audit),
            _ => None,
        }
    }

    pub fn into_parts(self) -> (Observation, Option<HealAudit>) {
        match self {
            HealOutcome::NotApplicable(observation) | HealOutcome::Exhausted { observation, .. } => {
                (observation, None)
            }
            HealOutcome::Resolved {
                observation, audit, ..
            } => (observation, Some(audit)),
        }
    }
}
