//! Recovery state machine.
//!
//! Transitions are pure; the driver in [`crate::healer`] performs the I/O
//! each state asks for and feeds the result back.
//!
//! ```text
//! Idle -> Diagnosing -> CandidateSelected -> Validating -> Retrying -> Resolved
//!                  \            ^                 |            |
//!                   \           +---- demote -----+------------+
//!                    +--------------------------------------------> Exhausted
//! ```

use soulbrowser_core_types::{Action, Observation};
use tracing::debug;

use crate::errors::LocatorError;
use crate::types::{Candidate, HealingConfig, SelfHealingAttempt};

#[derive(Debug, Clone, PartialEq)]
pub enum HealState {
    Idle,
    Diagnosing,
    CandidateSelected(Candidate),
    Validating(Candidate),
    Retrying(Candidate),
    Resolved(Candidate),
    Exhausted,
}

impl HealState {
    pub fn name(&self) -> &'static str {
        match self {
            HealState::Idle => "idle",
            HealState::Diagnosing => "diagnosing",
            HealState::CandidateSelected(_) => "candidate_selected",
            HealState::Validating(_) => "validating",
            HealState::Retrying(_) => "retrying",
            HealState::Resolved(_) => "resolved",
            HealState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HealState::Resolved(_) | HealState::Exhausted)
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryMachine {
    state: HealState,
    attempt: Option<SelfHealingAttempt>,
    config: HealingConfig,
    next_candidate: usize,
}

impl RecoveryMachine {
    pub fn new(config: HealingConfig) -> Self {
        Self {
            state: HealState::Idle,
            attempt: None,
            config,
            next_candidate: 0,
        }
    }

    pub fn state(&self) -> &HealState {
        &self.state
    }

    pub fn attempt(&self) -> Option<&SelfHealingAttempt> {
        self.attempt.as_ref()
    }

    pub fn into_attempt(self) -> Option<SelfHealingAttempt> {
        self.attempt
    }

    /// `Idle -> Diagnosing` for a missing-element failure of an action with
    /// a selector. Returns whether recovery applies; otherwise the machine
    /// stays idle.
    pub fn observe_failure(
        &mut self,
        action: &Action,
        observation: &Observation,
    ) -> Result<bool, LocatorError> {
        self.expect("observe_failure", |state| matches!(state, HealState::Idle))?;
        let selector = match action.selector() {
            Some(selector) if observation.is_element_not_found() && !observation.success => {
                selector
            }
            _ => return Ok(false),
        };
        self.attempt = Some(SelfHealingAttempt::new(
            action.id.clone(),
            selector,
            self.config.max_attempts,
        ));
        self.state = HealState::Diagnosing;
        debug!(action_id = %action.id, selector, "recovery diagnosing");
        Ok(true)
    }

    /// `Diagnosing -> CandidateSelected | Exhausted`.
    pub fn diagnosed(&mut self, candidates: Vec<Candidate>) -> Result<&HealState, LocatorError> {
        self.expect("diagnosed", |state| matches!(state, HealState::Diagnosing))?;
        let attempt = self.attempt_mut()?;
        attempt.candidate_selectors = candidates;
        self.select_next();
        Ok(&self.state)
    }

    /// `CandidateSelected -> Validating`; counts the attempt.
    pub fn begin_validation(&mut self) -> Result<&HealState, LocatorError> {
        let HealState::CandidateSelected(candidate) = &self.state else {
            return Err(self.invalid("begin_validation"));
        };
        let candidate = candidate.clone();
        let attempt = self.attempt_mut()?;
        attempt.attempt_count += 1;
        self.state = HealState::Validating(candidate);
        Ok(&self.state)
    }

    /// `Validating -> Retrying` on a unique usable match, otherwise demote.
    pub fn validated(&mut self, usable: bool) -> Result<&HealState, LocatorError> {
        let HealState::Validating(candidate) = &self.state else {
            return Err(self.invalid("validated"));
        };
        if usable {
            self.state = HealState::Retrying(candidate.clone());
        } else {
            debug!(selector = %candidate.selector, "candidate failed validation");
            self.demote();
        }
        Ok(&self.state)
    }

    /// `Retrying -> Resolved` on success, otherwise demote.
    pub fn retried(&mut self, success: bool) -> Result<&HealState, LocatorError> {
        let HealState::Retrying(candidate) = &self.state else {
            return Err(self.invalid("retried"));
        };
        let candidate = candidate.clone();
        if success {
            self.attempt_mut()?.resolved_selector = Some(candidate.selector.clone());
            self.state = HealState::Resolved(candidate);
        } else {
            debug!(selector = %candidate.selector, "candidate failed on retry");
            self.demote();
        }
        Ok(&self.state)
    }

    /// Gives up from any non-terminal state.
    pub fn abandon(&mut self) {
        if !self.state.is_terminal() && self.state != HealState::Idle {
            self.state = HealState::Exhausted;
        }
    }

    fn demote(&mut self) {
        let spent = self
            .attempt
            .as_ref()
            .map(|attempt| attempt.attempt_count >= attempt.max_attempts)
            .unwrap_or(true);
        if spent {
            self.state = HealState::Exhausted;
        } else {
            self.select_next();
        }
    }

    fn select_next(&mut self) {
        let next = self
            .attempt
            .as_ref()
            .and_then(|attempt| attempt.candidate_selectors.get(self.next_candidate))
            .cloned();
        match next {
            Some(candidate) if self.has_budget() => {
                self.next_candidate += 1;
                self.state = HealState::CandidateSelected(candidate);
            }
            _ => self.state = HealState::Exhausted,
        }
    }

    fn has_budget(&self) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|attempt| attempt.attempt_count < attempt.max_attempts)
    }

    fn attempt_mut(&mut self) -> Result<&mut SelfHealingAttempt, LocatorError> {
        self.attempt
            .as_mut()
            .ok_or_else(|| LocatorError::Internal("recovery has no attempt record".into()))
    }

    fn expect(
        &self,
        event: &str,
        allowed: impl Fn(&HealState) -> bool,
    ) -> Result<(), LocatorError> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(event))
        }
    }

    fn invalid(&self, event: &str) -> LocatorError {
        LocatorError::InvalidTransition {
            state: self.state.name().to_string(),
            event: event.to_string(),
        }
    }
}
