//! Operator decisions
//!
//! The sequencer asks whether to continue after a failed phase, rollback asks
//! for confirmation, SSH recovery may ask for a temporary password. The
//! console implementation lives in wardenctl; this module holds the trait
//! plus non-interactive and scripted implementations.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::config::OnFailure;
use crate::sequencer::PhaseResult;

/// What to do after a phase failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Continue,
    Abort,
}

impl From<OnFailure> for FailureDecision {
    fn from(policy: OnFailure) -> Self {
        match policy {
            OnFailure::Continue => FailureDecision::Continue,
            OnFailure::Abort => FailureDecision::Abort,
        }
    }
}

pub trait OperatorPrompt {
    /// Yes/no question; false means "no".
    fn confirm(&self, question: &str) -> bool;

    /// Decide the fate of the run after `result` failed.
    fn on_phase_failure(&self, result: &PhaseResult) -> FailureDecision;

    /// Secret input such as a temporary password. None means skipped.
    fn secret(&self, _question: &str) -> Option<String> {
        None
    }
}

/// Answers without asking (`--yes`, cron, CI).
#[derive(Debug, Clone, Copy)]
pub struct AutoPrompt {
    pub assume_yes: bool,
    pub on_failure: OnFailure,
}

impl AutoPrompt {
    pub fn new(assume_yes: bool, on_failure: OnFailure) -> Self {
        Self {
            assume_yes,
            on_failure,
        }
    }
}

impl OperatorPrompt for AutoPrompt {
    fn confirm(&self, _question: &str) -> bool {
        self.assume_yes
    }

    fn on_phase_failure(&self, _result: &PhaseResult) -> FailureDecision {
        self.on_failure.into()
    }
}

/// Replays queued answers and records every question asked.
///
/// When a queue runs dry, confirmations answer "no" and failures abort.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    confirmations: RefCell<VecDeque<bool>>,
    decisions: RefCell<VecDeque<FailureDecision>>,
    secret: Option<String>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm_with(self, answer: bool) -> Self {
        self.confirmations.borrow_mut().push_back(answer);
        self
    }

    pub fn decide(self, decision: FailureDecision) -> Self {
        self.decisions.borrow_mut().push_back(decision);
        self
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn confirm(&self, question: &str) -> bool {
        self.asked.borrow_mut().push(question.to_string());
        self.confirmations.borrow_mut().pop_front().unwrap_or(false)
    }

    fn on_phase_failure(&self, result: &PhaseResult) -> FailureDecision {
        self.asked
            .borrow_mut()
            .push(format!("phase {} failed", result.phase_id));
        self.decisions
            .borrow_mut()
            .pop_front()
            .unwrap_or(FailureDecision::Abort)
    }

    fn secret(&self, question: &str) -> Option<String> {
        self.asked.borrow_mut().push(question.to_string());
        self.secret.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_maps_to_decision() {
        assert_eq!(
            FailureDecision::from(OnFailure::Continue),
            FailureDecision::Continue
        );
        assert_eq!(FailureDecision::from(OnFailure::Abort), FailureDecision::Abort);
    }

    #[test]
    fn test_scripted_prompt_defaults_to_no() {
        let prompt = ScriptedPrompt::new().confirm_with(true);
        assert!(prompt.confirm("first?"));
        assert!(!prompt.confirm("second?"));
        assert_eq!(prompt.asked(), vec!["first?", "second?"]);
        assert_eq!(prompt.secret("password?"), None);
    }

    #[test]
    fn test_auto_prompt() {
        let prompt = AutoPrompt::new(true, OnFailure::Continue);
        assert!(prompt.confirm("restore?"));
        assert_eq!(prompt.secret("password?"), None);
    }
}
