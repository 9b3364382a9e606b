//! Configuration for the reasoning-loop step.

use std::time::Duration;

use perceiver_structural::CondenseOptions;
use serde::{Deserialize, Serialize};

/// Configuration for one conversation's reasoning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Reasoning rounds before the conversation is stopped with an error.
    /// Default: 50
    pub max_iterations: u32,

    /// Hold proposed actions until they are confirmed or rejected.
    /// Default: false
    pub confirmation_mode: bool,

    /// Timeout for a single reasoning query in milliseconds.
    /// Default: 60000 (60 seconds)
    pub llm_timeout_ms: u64,

    /// Query attempts before the step gives up.
    /// Default: 3
    pub max_query_attempts: u32,

    /// First backoff delay between query attempts; doubles each retry.
    /// Default: 200
    pub backoff_base_ms: u64,

    /// Ceiling for the backoff delay.
    /// Default: 5000
    pub backoff_max_ms: u64,

    /// Identical consecutive outcomes that mark a conversation stuck.
    /// Default: 3
    pub stuck_threshold: usize,

    /// Completed action/observation pairs summarised in the context.
    /// Default: 5
    pub recent_pairs: usize,

    /// Condensation settings for the page handed to the reasoning service.
    pub condense: CondenseOptions,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            confirmation_mode: false,
            llm_timeout_ms: 60_000,
            max_query_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            stuck_threshold: 3,
            recent_pairs: 5,
            condense: CondenseOptions::default(),
        }
    }
}

impl StepConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small limits and short timeouts for tests.
    pub fn minimal() -> Self {
        Self {
            max_iterations: 10,
            llm_timeout_ms: 1_000,
            max_query_attempts: 2,
            backoff_base_ms: 10,
            backoff_max_ms: 50,
            recent_pairs: 3,
            ..Self::default()
        }
    }

    /// Shorter timeouts and a tighter page budget.
    pub fn fast() -> Self {
        Self {
            max_iterations: 25,
            llm_timeout_ms: 30_000,
            backoff_base_ms: 100,
            backoff_max_ms: 2_000,
            condense: CondenseOptions::default().with_budget(1_000),
            ..Self::default()
        }
    }

    /// Builder: set the iteration limit.
    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Builder: hold actions for confirmation.
    pub fn confirmation(mut self, enabled: bool) -> Self {
        self.confirmation_mode = enabled;
        self
    }

    /// Builder: set the reasoning timeout.
    pub fn llm_timeout(mut self, ms: u64) -> Self {
        self.llm_timeout_ms = ms;
        self
    }

    /// Builder: set query attempts.
    pub fn query_attempts(mut self, attempts: u32) -> Self {
        self.max_query_attempts = attempts;
        self
    }

    /// Builder: set backoff bounds.
    pub fn backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    /// Builder: set the stuck threshold.
    pub fn stuck_threshold(mut self, threshold: usize) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    /// Builder: set condensation options.
    pub fn condense(mut self, options: CondenseOptions) -> Self {
        self.condense = options;
        self
    }

    pub fn llm_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }
}
