//! Reasoning-service port and the bounded retry around it.

use std::collections::VecDeque;
use std::time::Duration;

use action_primitives::ToolSpec;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StepConfig;
use crate::errors::AgentError;
use crate::model::{ReasoningContext, ReasoningResponse};

/// Decides what the agent does next.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn query(
        &self,
        context: &ReasoningContext,
        tools: &[ToolSpec],
    ) -> Result<ReasoningResponse, AgentError>;
}

/// Exponential backoff between query attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StepConfig) -> Self {
        Self {
            max_attempts: config.max_query_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before the attempt following `attempt` (1-based), or `None`
    /// once the attempts are spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.max_delay))
    }
}

/// Queries `service` until it gives a usable answer, the attempts run out,
/// or `cancel` fires. Each attempt is bounded by `config.llm_timeout_ms`.
pub async fn query_with_retry(
    service: &dyn ReasoningService,
    context: &ReasoningContext,
    tools: &[ToolSpec],
    config: &StepConfig,
    cancel: &CancellationToken,
) -> Result<ReasoningResponse, AgentError> {
    let policy = RetryPolicy::from_config(config);
    let budget = config.llm_timeout_duration();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            answer = tokio::time::timeout(budget, service.query(context, tools)) => match answer {
                Ok(Ok(response)) => check_response(response),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(AgentError::Timeout { after_ms: config.llm_timeout_ms }),
            },
        };
        let err = match result {
            Ok(response) => {
                debug!(attempt, "reasoning answered");
                return Ok(response);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };
        let Some(delay) = policy.delay_after(attempt) else {
            warn!(attempt, error = %err, "reasoning attempts exhausted");
            return Err(err);
        };
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "reasoning query failed; backing off"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn check_response(response: ReasoningResponse) -> Result<ReasoningResponse, AgentError> {
    if let ReasoningResponse::ToolCalls(calls) = &response {
        if calls.is_empty() {
            return Err(AgentError::invalid_response("empty tool call list"));
        }
        if calls.iter().any(|call| call.tool.trim().is_empty()) {
            return Err(AgentError::invalid_response("tool call without a tool name"));
        }
    }
    Ok(response)
}

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(ReasoningResponse),
    Fail(AgentError),
    /// Never answers; exercises the query timeout.
    Stall,
}

/// Deterministic service used for tests and offline runs: replays a fixed
/// script and records what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedReasoning {
    script: Mutex<VecDeque<ScriptedReply>>,
    seen: Mutex<Vec<(ReasoningContext, Vec<String>)>>,
}

impl ScriptedReasoning {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = ScriptedReply>,
    {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, reply: ScriptedReply) {
        self.script.lock().await.push_back(reply);
    }

    pub async fn calls(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Contexts received so far, oldest first.
    pub async fn contexts(&self) -> Vec<ReasoningContext> {
        self.seen
            .lock()
            .await
            .iter()
            .map(|(context, _)| context.clone())
            .collect()
    }

    /// Tool names offered on the most recent query.
    pub async fn last_tools(&self) -> Vec<String> {
        self.seen
            .lock()
            .await
            .last()
            .map(|(_, tools)| tools.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn query(
        &self,
        context: &ReasoningContext,
        tools: &[ToolSpec],
    ) -> Result<ReasoningResponse, AgentError> {
        self.seen.lock().await.push((
            context.clone(),
            tools.iter().map(|spec| spec.name.clone()).collect(),
        ));
        let next = self.script.lock().await.pop_front();
        match next {
            Some(ScriptedReply::Respond(response)) => Ok(response),
            Some(ScriptedReply::Fail(err)) => Err(err),
            Some(ScriptedReply::Stall) => {
                std::future::pending::<()>().await;
                Err(AgentError::reasoning("stalled reply resumed"))
            }
            None => Err(AgentError::reasoning("script exhausted")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolCallRequest;
    use serde_json::json;

    fn config() -> StepConfig {
        StepConfig::default().llm_timeout(100).backoff(200, 5_000)
    }

    #[test]
    fn backoff_doubles_and_stops() {
        let policy = RetryPolicy::from_config(&StepConfig::default());
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_after(3), None);

        let capped = RetryPolicy {
            max_attempts: 10,
            base: Duration::from_millis(200),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(capped.delay_after(4), Some(Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let service = ScriptedReasoning::new([
            ScriptedReply::Fail(AgentError::reasoning("503")),
            ScriptedReply::Stall,
            ScriptedReply::Respond(ReasoningResponse::Text("hello".into())),
        ]);
        let answer = query_with_retry(
            &service,
            &ReasoningContext::default(),
            &[],
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(answer, ReasoningResponse::Text("hello".into()));
        assert_eq!(service.calls().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let service = ScriptedReasoning::new([
            ScriptedReply::Respond(ReasoningResponse::ToolCalls(Vec::new())),
            ScriptedReply::Fail(AgentError::reasoning("503")),
            ScriptedReply::Stall,
        ]);
        let err = query_with_retry(
            &service,
            &ReasoningContext::default(),
            &[],
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, AgentError::Timeout { after_ms: 100 });
        assert_eq!(service.calls().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_stop_immediately() {
        let service = ScriptedReasoning::new([
            ScriptedReply::Fail(AgentError::Cancelled),
            ScriptedReply::Respond(ReasoningResponse::Text("late".into())),
        ]);
        let err = query_with_retry(
            &service,
            &ReasoningContext::default(),
            &[],
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
        assert_eq!(service.calls().await, 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_query() {
        let service = ScriptedReasoning::new([ScriptedReply::Stall]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = query_with_retry(
            &service,
            &ReasoningContext::default(),
            &[],
            &config(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
    }

    #[tokio::test]
    async fn scripted_service_records_tools() {
        let call = ToolCallRequest::new("click", json!({ "selector": "#a" }));
        let service = ScriptedReasoning::new([ScriptedReply::Respond(
            ReasoningResponse::ToolCalls(vec![call.clone()]),
        )]);
        let tools = vec![ToolSpec::new("click", "Click", Default::default())];
        let answer = service
            .query(&ReasoningContext::default(), &tools)
            .await
            .unwrap();
        assert_eq!(answer, ReasoningResponse::ToolCalls(vec![call]));
        assert_eq!(service.last_tools().await, vec!["click".to_string()]);
    }
}
