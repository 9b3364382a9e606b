//! Deadline-bounded execution of one action into exactly one observation.

use std::sync::Arc;
use std::time::Duration;

use soulbrowser_core_types::{Action, ArtifactRef, ErrorKind, Observation};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ActionError, ToolFailure};
use crate::registry::{Executable, ToolRegistry};
use crate::sink::{artifact_location, ArtifactSink};
use crate::types::{ExecutionPolicy, Proposal, ToolArtifact, ToolOutput};

enum Attempt {
    Finished(Result<ToolOutput, ToolFailure>),
    TimedOut,
    Cancelled,
}

#[derive(Clone)]
pub struct ActionExecutor {
    registry: Arc<ToolRegistry>,
    sink: Option<Arc<dyn ArtifactSink>>,
    policy: ExecutionPolicy,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            sink: None,
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> Option<&Arc<dyn ArtifactSink>> {
        self.sink.as_ref()
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Deadline for an action started now.
    pub fn deadline_from_now(&self) -> Instant {
        let attempts = self.policy.timeout_retries.saturating_add(1);
        Instant::now() + self.policy.action_timeout.saturating_mul(attempts)
    }

    /// Runs `action` and classifies the outcome. Never fails: every outcome,
    /// including resolution errors, is an observation.
    pub async fn execute(
        &self,
        action: &Action,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Observation {
        let started = Instant::now();
        let observation = match self.registry.resolve(&action.tool_name, &action.arguments) {
            Ok(executable) => self.run_attempts(action, executable, deadline, cancel).await,
            Err(err) => {
                warn!(action_id = %action.id, tool = %action.tool_name, error = %err, "action not resolvable");
                Observation::failure(action, err.error_kind(), err.to_string())
            }
        };
        let observation = observation.with_duration(started.elapsed().as_millis() as u64);
        info!(
            action_id = %action.id,
            tool = %action.tool_name,
            success = observation.success,
            error_kind = observation.error_kind.map(|kind| kind.as_str()).unwrap_or("none"),
            duration_ms = observation.duration_ms,
            "action executed"
        );
        observation
    }

    async fn run_attempts(
        &self,
        action: &Action,
        executable: Box<dyn Executable>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Observation {
        let mut retries_left = self.policy.timeout_retries;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Observation::failure(action, ErrorKind::Timeout, "cancelled before start");
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Observation::failure(action, ErrorKind::Timeout, "deadline exceeded");
            }
            let budget = remaining.min(self.policy.action_timeout);
            let attempt_token = cancel.child_token();
            debug!(action_id = %action.id, attempt, budget_ms = budget.as_millis() as u64, "running tool");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Attempt::Cancelled,
                result = tokio::time::timeout(budget, executable.run(action, attempt_token.clone())) => {
                    match result {
                        Ok(result) => Attempt::Finished(result),
                        Err(_) => Attempt::TimedOut,
                    }
                }
            };

            let timeout_message = match outcome {
                Attempt::Finished(Ok(output)) => {
                    let artifacts = self.persist(action, output.artifacts).await;
                    return Observation::success(action, output.content).with_artifacts(artifacts);
                }
                Attempt::Finished(Err(ToolFailure::Timeout(message))) => message,
                Attempt::Finished(Err(failure)) => {
                    debug!(action_id = %action.id, error = %failure, "tool reported failure");
                    return Observation::failure(action, failure.error_kind(), failure.to_string());
                }
                Attempt::TimedOut => {
                    attempt_token.cancel();
                    format!("no result within {}ms", budget.as_millis())
                }
                Attempt::Cancelled => {
                    attempt_token.cancel();
                    return Observation::failure(action, ErrorKind::Timeout, "cancelled");
                }
            };

            let has_time = deadline.saturating_duration_since(Instant::now()) > Duration::ZERO;
            if retries_left == 0 || !has_time {
                return Observation::failure(action, ErrorKind::Timeout, timeout_message);
            }
            retries_left -= 1;
            warn!(action_id = %action.id, attempt, reason = %timeout_message, "tool timed out; re-issuing");
        }
    }

    async fn persist(&self, action: &Action, artifacts: Vec<ToolArtifact>) -> Vec<ArtifactRef> {
        if artifacts.is_empty() {
            return Vec::new();
        }
        let Some(sink) = &self.sink else {
            debug!(action_id = %action.id, count = artifacts.len(), "no artifact sink; artifacts discarded");
            return Vec::new();
        };
        let mut refs = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let location = artifact_location(artifact.kind, &action.id, &artifact.name);
            match sink.store(&location, &artifact.bytes).await {
                Ok(()) => refs.push(ArtifactRef {
                    kind: artifact.kind,
                    location,
                    bytes: artifact.bytes.len() as u64,
                }),
                Err(err) => warn!(action_id = %action.id, %location, error = %err, "artifact not persisted"),
            }
        }
        refs
    }

    /// Checks that `action` resolves without running it.
    pub fn propose(&self, action: Action) -> Result<Proposal, ActionError> {
        self.registry
            .resolve(&action.tool_name, &action.arguments)?;
        debug!(action_id = %action.id, tool = %action.tool_name, "action proposed");
        Ok(Proposal::from(action))
    }

    /// Runs a proposal (or a bare action) after confirmation.
    pub async fn commit(
        &self,
        proposal: impl Into<Proposal>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Observation {
        let proposal = proposal.into();
        self.execute(&proposal.action, deadline, cancel).await
    }

    /// Observation for an action that will not run.
    pub fn reject(&self, action: &Action, reason: &str) -> Observation {
        info!(action_id = %action.id, tool = %action.tool_name, reason, "action rejected");
        Observation::failure(action, ErrorKind::ToolError, format!("rejected: {reason}"))
    }
}
