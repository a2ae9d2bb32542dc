//! Phase sequencer
//!
//! Runs registered phases in ordinal order behind the pre-flight gate,
//! records every outcome in a run-scoped completion ledger, and lets the
//! operator (or the configured policy) decide what happens after a failure.

mod ledger;
mod lock;
mod preflight;
mod registry;
mod report;
mod validation;

pub use ledger::CompletionLedger;
pub use lock::RunLock;
pub use preflight::{run_preflight, PreflightCheck, PreflightReport};
pub use registry::PhaseRegistry;
pub use report::{render_final_report, write_final_report, OPERATOR_CHECKLIST};
pub use validation::{run_validation, ValidationCheck, ValidationPhase, ValidationReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::logging::StatusLog;
use crate::prompt::{FailureDecision, OperatorPrompt};
use crate::system::SystemCollaborator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Completed => "COMPLETED",
            PhaseStatus::Failed => "FAILED",
            PhaseStatus::Skipped => "SKIPPED",
        }
    }
}

/// What a phase handler reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed(String),
    Failed(String),
    Skipped(String),
}

impl PhaseOutcome {
    pub fn status(&self) -> PhaseStatus {
        match self {
            PhaseOutcome::Completed(_) => PhaseStatus::Completed,
            PhaseOutcome::Failed(_) => PhaseStatus::Failed,
            PhaseOutcome::Skipped(_) => PhaseStatus::Skipped,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PhaseOutcome::Completed(m) | PhaseOutcome::Failed(m) | PhaseOutcome::Skipped(m) => m,
        }
    }
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_id: String,
    pub ordinal: u32,
    pub status: PhaseStatus,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub message: String,
}

impl PhaseResult {
    pub fn duration_secs(&self) -> i64 {
        (self.finished - self.started).num_seconds().max(0)
    }
}

/// Everything a phase may use. Phases get no in-memory state from earlier
/// phases; what they need from a previous step must be read from the host.
pub struct PhaseContext<'a> {
    pub system: &'a dyn SystemCollaborator,
    pub log: &'a StatusLog,
    pub config: &'a WardenConfig,
    /// Per-run directory for safety copies
    pub backup_dir: PathBuf,
    pub run_started: DateTime<Utc>,
}

/// Module contract implemented by every phase.
///
/// `run` must be idempotent: when the target state already holds it returns
/// `Completed` without mutating anything.
pub trait Phase {
    fn id(&self) -> &str;
    fn ordinal(&self) -> u32;
    fn description(&self) -> &str;

    /// Advisory ordering hints; a failed dependency only produces a warning.
    fn depends_on(&self) -> &[&'static str] {
        &[]
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome;
}

/// State of one run, returned to the caller when the run ends
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub backup_dir: PathBuf,
    pub ledger: CompletionLedger,
    pub aborted_after: Option<String>,
    pub report_path: Option<PathBuf>,
}

impl RunContext {
    pub fn new(backup_dir: PathBuf) -> Self {
        Self {
            run_id: crate::timestamp(),
            started: Utc::now(),
            backup_dir,
            ledger: CompletionLedger::new(),
            aborted_after: None,
            report_path: None,
        }
    }

    pub fn aborted(&self) -> bool {
        self.aborted_after.is_some()
    }

    /// 0 unless the run was aborted after a failed phase
    pub fn exit_code(&self) -> i32 {
        if self.aborted() {
            3
        } else {
            0
        }
    }
}

pub struct Sequencer<'a> {
    system: &'a dyn SystemCollaborator,
    log: &'a StatusLog,
    config: &'a WardenConfig,
    registry: PhaseRegistry,
    prompt: &'a dyn OperatorPrompt,
    interactive: bool,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        system: &'a dyn SystemCollaborator,
        log: &'a StatusLog,
        config: &'a WardenConfig,
        registry: PhaseRegistry,
        prompt: &'a dyn OperatorPrompt,
    ) -> Self {
        Self {
            system,
            log,
            config,
            registry,
            prompt,
            interactive: config.sequencer.interactive.unwrap_or(false),
        }
    }

    /// Operator decides after failures instead of the configured policy.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    pub fn preflight(&self) -> PreflightReport {
        self.log.info("Running pre-flight checks");
        let report = run_preflight(self.system, self.config, &self.registry);
        report.log(self.log);
        report
    }

    fn gate(&self) -> Result<()> {
        let report = self.preflight();
        if report.passed() {
            Ok(())
        } else {
            let reason = report.failure_summary();
            self.log
                .error(format!("Pre-flight gate closed, no phase was run: {}", reason));
            Err(WardenError::Preflight(reason))
        }
    }

    fn begin(&self) -> RunContext {
        let run = RunContext::new(self.config.paths.backup_root.join(crate::timestamp()));
        self.log.info(format!(
            "Run {} started, safety copies in {}",
            run.run_id,
            run.backup_dir.display()
        ));
        run
    }

    fn context(&self, run: &RunContext) -> PhaseContext<'_> {
        PhaseContext {
            system: self.system,
            log: self.log,
            config: self.config,
            backup_dir: run.backup_dir.clone(),
            run_started: run.started,
        }
    }

    fn execute(&self, phase: &dyn Phase, ctx: &PhaseContext, run: &RunContext) -> PhaseResult {
        for dep in phase.depends_on() {
            if run.ledger.status_of(dep) == Some(PhaseStatus::Failed) {
                self.log.warning(format!(
                    "{} runs although its dependency {} failed",
                    phase.id(),
                    dep
                ));
            }
        }

        self.log
            .info(format!("Phase {}: {}", phase.id(), phase.description()));
        let started = Utc::now();
        let outcome = phase.run(ctx);
        let finished = Utc::now();

        match &outcome {
            PhaseOutcome::Completed(m) => self.log.success(format!("{}: {}", phase.id(), m)),
            PhaseOutcome::Skipped(m) => self.log.info(format!("{} skipped: {}", phase.id(), m)),
            PhaseOutcome::Failed(m) => self.log.error(format!("{} failed: {}", phase.id(), m)),
        }

        PhaseResult {
            phase_id: phase.id().to_string(),
            ordinal: phase.ordinal(),
            status: outcome.status(),
            started,
            finished,
            message: outcome.message().to_string(),
        }
    }

    fn decide(&self, result: &PhaseResult) -> FailureDecision {
        if self.interactive {
            self.prompt.on_phase_failure(result)
        } else {
            self.config.sequencer.on_failure.into()
        }
    }

    /// Run every registered phase in order and write the final report.
    ///
    /// Errors only for a closed gate or a held lock; phase failures are
    /// recorded in the returned ledger.
    pub fn run_all(&self) -> Result<RunContext> {
        let _lock = RunLock::acquire(&self.config.paths.lock_file)?;
        self.gate()?;

        let mut run = self.begin();
        let ctx = self.context(&run);

        for phase in self.registry.iter() {
            if let Some(failed) = &run.aborted_after {
                let now = Utc::now();
                run.ledger.record(PhaseResult {
                    phase_id: phase.id().to_string(),
                    ordinal: phase.ordinal(),
                    status: PhaseStatus::Skipped,
                    started: now,
                    finished: now,
                    message: format!("not run: aborted after {}", failed),
                });
                continue;
            }

            let result = self.execute(phase, &ctx, &run);
            let failed = result.status == PhaseStatus::Failed;
            if failed {
                match self.decide(&result) {
                    FailureDecision::Continue => self
                        .log
                        .warning(format!("Continuing after failed phase {}", result.phase_id)),
                    FailureDecision::Abort => {
                        self.log
                            .error(format!("Aborting run after failed phase {}", result.phase_id));
                        run.aborted_after = Some(result.phase_id.clone());
                    }
                }
            }
            run.ledger.record(result);
        }

        match write_final_report(&run, self.system, self.config) {
            Ok(path) => {
                self.log
                    .info(format!("Final report written to {}", path.display()));
                run.report_path = Some(path);
            }
            Err(e) => self.log.error(format!("Cannot write final report: {}", e)),
        }

        Ok(run)
    }

    /// Run one phase by id, behind the same gate and lock as a full run.
    pub fn run_single(&self, id: &str) -> Result<RunContext> {
        let phase = self
            .registry
            .get(id)
            .ok_or_else(|| WardenError::UnknownPhase(id.to_string()))?;

        let _lock = RunLock::acquire(&self.config.paths.lock_file)?;
        self.gate()?;

        let mut run = self.begin();
        let ctx = self.context(&run);
        let result = self.execute(phase, &ctx, &run);
        if result.status == PhaseStatus::Failed {
            run.aborted_after = Some(result.phase_id.clone());
        }
        run.ledger.record(result);
        Ok(run)
    }
}
