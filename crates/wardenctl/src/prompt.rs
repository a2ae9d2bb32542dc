//! Console operator prompt

use console::Term;
use owo_colors::OwoColorize;
use warden_common::sequencer::PhaseResult;
use warden_common::{FailureDecision, OperatorPrompt};

/// Asks on the terminal. `--yes` answers confirmations without asking.
pub struct ConsolePrompt {
    term: Term,
    assume_yes: bool,
}

impl ConsolePrompt {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            term: Term::stderr(),
            assume_yes,
        }
    }

    fn ask(&self, question: &str) -> Option<String> {
        self.term.write_str(question).ok()?;
        self.term.read_line().ok().map(|l| l.trim().to_lowercase())
    }
}

/// `y`/`yes`, anything else is no
pub fn parse_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// `c`/`continue`; everything else, including empty input, aborts
pub fn parse_decision(answer: &str) -> FailureDecision {
    match answer.trim().to_lowercase().as_str() {
        "c" | "continue" => FailureDecision::Continue,
        _ => FailureDecision::Abort,
    }
}

impl OperatorPrompt for ConsolePrompt {
    fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        self.ask(&format!("{} [y/N] ", question))
            .map(|a| parse_yes(&a))
            .unwrap_or(false)
    }

    fn on_phase_failure(&self, result: &PhaseResult) -> FailureDecision {
        let _ = self.term.write_line(&format!(
            "{} phase {} failed: {}",
            "[FAIL]".red(),
            result.phase_id,
            result.message
        ));
        self.ask("Continue with the remaining phases or abort? [c/A] ")
            .map(|a| parse_decision(&a))
            .unwrap_or(FailureDecision::Abort)
    }

    fn secret(&self, question: &str) -> Option<String> {
        self.term.write_str(&format!("{} ", question)).ok()?;
        let first = self.term.read_secure_line().ok()?;
        if first.is_empty() {
            return None;
        }
        self.term.write_str("Repeat: ").ok()?;
        let second = self.term.read_secure_line().ok()?;
        if first == second {
            Some(first)
        } else {
            let _ = self.term.write_line("Entries differ, skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes() {
        assert!(parse_yes("y"));
        assert!(parse_yes(" YES "));
        assert!(!parse_yes(""));
        assert!(!parse_yes("n"));
        assert!(!parse_yes("yep"));
    }

    #[test]
    fn test_parse_decision_defaults_to_abort() {
        assert_eq!(parse_decision("c"), FailureDecision::Continue);
        assert_eq!(parse_decision("Continue"), FailureDecision::Continue);
        assert_eq!(parse_decision(""), FailureDecision::Abort);
        assert_eq!(parse_decision("x"), FailureDecision::Abort);
    }
}
