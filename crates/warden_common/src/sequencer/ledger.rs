//! Completion ledger: one result per phase, scoped to a single run.

use std::collections::BTreeMap;

use super::{PhaseResult, PhaseStatus};

/// Results keyed by ordinal so iteration follows execution order.
#[derive(Debug, Clone, Default)]
pub struct CompletionLedger {
    results: BTreeMap<u32, PhaseResult>,
}

impl CompletionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, replacing an earlier one for the same phase.
    pub fn record(&mut self, result: PhaseResult) {
        self.results.insert(result.ordinal, result);
    }

    pub fn get(&self, phase_id: &str) -> Option<&PhaseResult> {
        self.results.values().find(|r| r.phase_id == phase_id)
    }

    pub fn status_of(&self, phase_id: &str) -> Option<PhaseStatus> {
        self.get(phase_id).map(|r| r.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseResult> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn count(&self, status: PhaseStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// Plain-text table used by the final report.
    pub fn render_table(&self) -> String {
        if self.results.is_empty() {
            return "  (no phases run)\n".to_string();
        }

        let mut out = format!(
            "  {:<4} {:<20} {:<10} {:>8}  {}\n",
            "#", "Phase", "Status", "Seconds", "Message"
        );
        for result in self.results.values() {
            out.push_str(&format!(
                "  {:<4} {:<20} {:<10} {:>8}  {}\n",
                result.ordinal,
                result.phase_id,
                result.status.as_str(),
                result.duration_secs(),
                result.message
            ));
        }
        out.push_str(&format!(
            "\n  completed {} / failed {} / skipped {}\n",
            self.count(PhaseStatus::Completed),
            self.count(PhaseStatus::Failed),
            self.count(PhaseStatus::Skipped)
        ));
        out
    }
}
