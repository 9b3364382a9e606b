//! Recovery driver: performs the I/O each [`HealState`] asks for.

use std::future::Future;
use std::sync::Arc;

use action_primitives::{ActionExecutor, ArtifactSink};
use async_trait::async_trait;
use perceiver_structural::{interactable, query, visible, CondenseOptions, DomTree, RawPage};
use serde_json::Value;
use soulbrowser_core_types::{Action, Observation};
use soulbrowser_event_store::HealAudit;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidates::generate_candidates;
use crate::errors::LocatorError;
use crate::machine::{HealState, RecoveryMachine};
use crate::types::{Candidate, HealOutcome, HealingConfig, SelfHealingAttempt};

/// Captures the page a failed action ran against. Work that can outlive
/// the conversation should honor `cancel`.
#[async_trait]
pub trait PageSnapshotSource: Send + Sync {
    async fn capture(
        &self,
        action: &Action,
        failed: &Observation,
        cancel: &CancellationToken,
    ) -> Result<RawPage, LocatorError>;
}

/// What a probe saw for one selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeReport {
    pub matches: usize,
    pub visible: bool,
    pub interactable: bool,
}

impl ProbeReport {
    /// Exactly one visible, interactable match.
    pub fn is_usable(&self) -> bool {
        self.matches == 1 && self.visible && self.interactable
    }
}

/// Evaluates a candidate selector against the live page.
#[async_trait]
pub trait SelectorProbe: Send + Sync {
    /// `diagnosed` is the tree the candidates were generated from.
    async fn probe(&self, selector: &str, diagnosed: &DomTree)
        -> Result<ProbeReport, LocatorError>;
}

/// Probes the diagnosed snapshot itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotProbe;

#[async_trait]
impl SelectorProbe for SnapshotProbe {
    async fn probe(
        &self,
        selector: &str,
        diagnosed: &DomTree,
    ) -> Result<ProbeReport, LocatorError> {
        let matches = query(diagnosed, selector).map_err(|err| LocatorError::ProbeFailed {
            selector: selector.to_string(),
            reason: err.to_string(),
        })?;
        let mut report = ProbeReport {
            matches: matches.len(),
            ..ProbeReport::default()
        };
        if let [node] = matches.as_slice() {
            report.visible = visible(diagnosed, *node).ok;
            report.interactable = interactable(diagnosed, *node).ok;
        }
        Ok(report)
    }
}

/// Reads the DOM snapshot attached to the failed observation, or a fallback
/// location (typically the latest snapshot the conversation has seen).
pub struct ArtifactSnapshotSource {
    sink: Arc<dyn ArtifactSink>,
    fallback: Option<String>,
}

impl ArtifactSnapshotSource {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            sink,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, location: impl Into<String>) -> Self {
        self.fallback = Some(location.into());
        self
    }
}

#[async_trait]
impl PageSnapshotSource for ArtifactSnapshotSource {
    async fn capture(
        &self,
        _action: &Action,
        failed: &Observation,
        _cancel: &CancellationToken,
    ) -> Result<RawPage, LocatorError> {
        let location = failed
            .dom_snapshot()
            .map(|artifact| artifact.location.as_str())
            .or(self.fallback.as_deref())
            .ok_or_else(|| LocatorError::SnapshotUnavailable("no DOM snapshot recorded".into()))?;
        load_page(self.sink.as_ref(), location).await
    }
}

/// Captures a fresh snapshot by running a capture tool that returns a DOM
/// snapshot artifact.
pub struct ToolSnapshotSource {
    executor: ActionExecutor,
    tool_name: String,
}

impl ToolSnapshotSource {
    pub fn new(executor: ActionExecutor, tool_name: impl Into<String>) -> Self {
        Self {
            executor,
            tool_name: tool_name.into(),
        }
    }
}

#[async_trait]
impl PageSnapshotSource for ToolSnapshotSource {
    async fn capture(
        &self,
        action: &Action,
        _failed: &Observation,
        cancel: &CancellationToken,
    ) -> Result<RawPage, LocatorError> {
        let sink = self.executor.sink().ok_or_else(|| {
            LocatorError::SnapshotUnavailable("executor has no artifact sink".into())
        })?;
        let capture = Action::new(self.tool_name.clone(), Value::Null);
        let deadline = self.executor.deadline_from_now();
        let observation = self
            .executor
            .execute(&capture, deadline, cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(LocatorError::Cancelled);
        }
        if !observation.success {
            return Err(LocatorError::SnapshotUnavailable(format!(
                "capture for {} failed: {}",
                action.id,
                observation.error_message.unwrap_or_default()
            )));
        }
        let artifact = observation.dom_snapshot().ok_or_else(|| {
            LocatorError::SnapshotUnavailable("capture returned no DOM snapshot".into())
        })?;
        load_page(sink.as_ref(), &artifact.location).await
    }
}

/// Runs `work` until it finishes, `deadline` passes or `cancel` fires.
async fn bounded<T, F>(
    what: &str,
    work: F,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<T, LocatorError>
where
    F: Future<Output = Result<T, LocatorError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LocatorError::Cancelled),
        result = tokio::time::timeout_at(deadline, work) => match result {
            Ok(result) => result,
            Err(_) => Err(LocatorError::DeadlineExceeded(what.to_string())),
        },
    }
}

async fn load_page(sink: &dyn ArtifactSink, location: &str) -> Result<RawPage, LocatorError> {
    let bytes = sink
        .load(location)
        .await
        .map_err(|err| LocatorError::SnapshotUnavailable(err.to_string()))?;
    Ok(RawPage::from_bytes(&bytes)?)
}

/// Drives one [`RecoveryMachine`] per failing observation.
#[derive(Clone)]
pub struct SelfHealer {
    executor: ActionExecutor,
    snapshots: Arc<dyn PageSnapshotSource>,
    probe: Arc<dyn SelectorProbe>,
    config: HealingConfig,
    condense: CondenseOptions,
}

impl SelfHealer {
    pub fn new(executor: ActionExecutor, snapshots: Arc<dyn PageSnapshotSource>) -> Self {
        Self {
            executor,
            snapshots,
            probe: Arc::new(SnapshotProbe),
            config: HealingConfig::default(),
            condense: CondenseOptions::default(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn SelectorProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_config(mut self, config: HealingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_condense_options(mut self, options: CondenseOptions) -> Self {
        self.condense = options;
        self
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Attempts recovery for `observation` of `action`. Every path yields
    /// exactly one observation for the action.
    pub async fn recover(
        &self,
        action: &Action,
        observation: Observation,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> HealOutcome {
        let mut machine = RecoveryMachine::new(self.config.clone());
        match machine.observe_failure(action, &observation) {
            Ok(true) => {}
            Ok(false) => return HealOutcome::NotApplicable(observation),
            Err(err) => {
                warn!(action_id = %action.id, error = %err, "recovery could not start");
                return HealOutcome::NotApplicable(observation);
            }
        }
        info!(
            action_id = %action.id,
            selector = action.selector().unwrap_or_default(),
            "selector recovery started"
        );

        let diagnosis = bounded(
            "diagnosis",
            self.diagnose(action, &observation, cancel),
            deadline,
            cancel,
        )
        .await;
        let mut healed: Option<Observation> = None;
        let (tree, mut step) = match diagnosis {
            Ok((tree, candidates)) => (tree, machine.diagnosed(candidates).map(|_| ())),
            Err(err) if err.is_interruption() => (DomTree::new(), Err(err)),
            Err(err) => {
                warn!(action_id = %action.id, error = %err, "diagnosis failed");
                (DomTree::new(), machine.diagnosed(Vec::new()).map(|_| ()))
            }
        };
        while step.is_ok() && !machine.state().is_terminal() {
            if cancel.is_cancelled() {
                machine.abandon();
                break;
            }
            step = match machine.state().clone() {
                HealState::CandidateSelected(_) => machine.begin_validation().map(|_| ()),
                HealState::Validating(candidate) => {
                    bounded("validation", self.validate(&candidate, &tree), deadline, cancel)
                        .await
                        .and_then(|usable| machine.validated(usable).map(|_| ()))
                }
                HealState::Retrying(candidate) => {
                    let retry = action.with_selector(&candidate.selector);
                    let result = self.executor.execute(&retry, deadline, cancel).await;
                    let success = result.success;
                    if success {
                        healed = Some(result);
                    } else {
                        debug!(
                            selector = %candidate.selector,
                            error_kind = result.error_kind.map(|k| k.as_str()).unwrap_or("none"),
                            "retry with candidate failed"
                        );
                    }
                    machine.retried(success).map(|_| ())
                }
                other => Err(LocatorError::Internal(format!(
                    "driver reached unexpected state {}",
                    other.name()
                ))),
            };
        }
        if let Err(err) = step {
            warn!(action_id = %action.id, error = %err, "recovery aborted");
            machine.abandon();
        }

        let state = machine.state().clone();
        let attempt = machine.into_attempt().unwrap_or_else(|| {
            SelfHealingAttempt::new(action.id.clone(), "", self.config.max_attempts)
        });
        match (state, healed) {
            (HealState::Resolved(candidate), Some(observation)) => {
                let audit = HealAudit {
                    action_id: action.id.clone(),
                    old_selector: attempt.original_selector.clone(),
                    new_selector: candidate.selector.clone(),
                    strategy: candidate.kind.name().to_string(),
                    attempts: attempt.attempt_count,
                };
                info!(
                    action_id = %action.id,
                    old = %audit.old_selector,
                    new = %audit.new_selector,
                    strategy = %audit.strategy,
                    attempts = audit.attempts,
                    "selector healed"
                );
                HealOutcome::Resolved {
                    observation,
                    audit,
                    attempt,
                }
            }
            _ => {
                info!(
                    action_id = %action.id,
                    attempts = attempt.attempt_count,
                    candidates = attempt.candidate_selectors.len(),
                    "selector recovery exhausted"
                );
                HealOutcome::Exhausted {
                    observation,
                    attempt,
                }
            }
        }
    }

    async fn diagnose(
        &self,
        action: &Action,
        observation: &Observation,
        cancel: &CancellationToken,
    ) -> Result<(DomTree, Vec<Candidate>), LocatorError> {
        let page = self.snapshots.capture(action, observation, cancel).await?;
        let tree = page.parse()?;
        let condensed = page.condense(&self.condense)?;
        let original = action.selector().unwrap_or_default();
        let candidates = generate_candidates(
            &condensed,
            &tree,
            action,
            original,
            self.config.max_candidates,
        );
        Ok((tree, candidates))
    }

    /// Probe errors count as an unusable candidate.
    async fn validate(&self, candidate: &Candidate, tree: &DomTree) -> Result<bool, LocatorError> {
        Ok(match self.probe.probe(&candidate.selector, tree).await {
            Ok(report) => {
                debug!(
                    selector = %candidate.selector,
                    kind = candidate.kind.name(),
                    matches = report.matches,
                    visible = report.visible,
                    interactable = report.interactable,
                    "candidate probed"
                );
                report.is_usable()
            }
            Err(err) => {
                warn!(selector = %candidate.selector, error = %err, "probe failed");
                false
            }
        })
    }
}
