//! Bounded security scan

use std::time::Duration;

use crate::config::ScanMode;
use crate::sequencer::{Phase, PhaseContext, PhaseOutcome};

const QUICK_SCAN: &[&str] = &["--check", "--skip-keypress", "--report-warnings-only"];
const FULL_SCAN: &[&str] = &["audit", "system", "--quick", "--no-colors"];

/// rkhunter for the quick scan, lynis for the full audit. Read-only.
pub struct SecurityScanPhase {
    mode: ScanMode,
}

impl SecurityScanPhase {
    pub fn new(mode: ScanMode) -> Self {
        Self { mode }
    }

    fn command(&self) -> (&'static str, &'static [&'static str]) {
        match self.mode {
            ScanMode::Quick => ("rkhunter", QUICK_SCAN),
            ScanMode::Full => ("lynis", FULL_SCAN),
        }
    }

    fn ceiling(&self, ctx: &PhaseContext) -> Duration {
        let secs = match self.mode {
            ScanMode::Quick => ctx.config.timeouts.quick_scan_secs,
            ScanMode::Full => ctx.config.timeouts.full_scan_secs,
        };
        Duration::from_secs(secs)
    }
}

impl Phase for SecurityScanPhase {
    fn id(&self) -> &str {
        "security-scan"
    }

    fn ordinal(&self) -> u32 {
        100
    }

    fn description(&self) -> &str {
        match self.mode {
            ScanMode::Quick => "Quick rootkit scan (rkhunter)",
            ScanMode::Full => "Full security audit (lynis)",
        }
    }

    fn depends_on(&self) -> &[&'static str] {
        &["base-packages"]
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome {
        let (program, args) = self.command();
        let ceiling = self.ceiling(ctx);
        ctx.log.info(format!(
            "Running {} (ceiling {}s)",
            program,
            ceiling.as_secs()
        ));

        let out = ctx.system.run(program, args, ceiling);
        if out.timed_out {
            return PhaseOutcome::Failed(format!(
                "{} exceeded its {}s ceiling and was stopped",
                program,
                ceiling.as_secs()
            ));
        }

        match (self.mode, out.exit_code) {
            (_, 127) => PhaseOutcome::Skipped(format!("{} is not installed", program)),
            (_, 0) => PhaseOutcome::Completed(format!("{} found nothing to report", program)),
            // rkhunter exits 1 when it printed warnings
            (ScanMode::Quick, 1) => {
                let warnings = out
                    .stdout
                    .lines()
                    .filter(|l| l.contains("Warning:"))
                    .count();
                ctx.log.warning(format!(
                    "rkhunter reported {} warning(s), see /var/log/rkhunter.log",
                    warnings
                ));
                PhaseOutcome::Completed(format!("{} warning(s) to review", warnings))
            }
            _ => PhaseOutcome::Failed(format!("{}: {}", program, out.reason())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;
    use crate::logging::StatusLog;
    use crate::phases::testing::context;
    use crate::system::{CommandOutput, FakeSystem};

    fn run_with(mode: ScanMode, output: CommandOutput) -> PhaseOutcome {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let log = StatusLog::memory("warden");
        let program = if mode == ScanMode::Quick { "rkhunter" } else { "lynis" };
        let system = FakeSystem::healthy().with_response(program, output);
        let ctx = context(&system, &log, &config);
        SecurityScanPhase::new(mode).run(&ctx)
    }

    #[test]
    fn test_scan_outcomes() {
        assert!(matches!(
            run_with(ScanMode::Quick, CommandOutput::failed(127, "not found")),
            PhaseOutcome::Skipped(_)
        ));
        assert!(matches!(
            run_with(ScanMode::Full, CommandOutput::ok("Hardening index : 71")),
            PhaseOutcome::Completed(_)
        ));

        let warnings = CommandOutput {
            exit_code: 1,
            stdout: "Warning: The command '/usr/bin/lwp-request' has been replaced by a script\n"
                .to_string(),
            ..Default::default()
        };
        assert_eq!(
            run_with(ScanMode::Quick, warnings),
            PhaseOutcome::Completed("1 warning(s) to review".to_string())
        );

        let timed_out = CommandOutput {
            exit_code: -1,
            timed_out: true,
            ..Default::default()
        };
        assert!(matches!(
            run_with(ScanMode::Full, timed_out),
            PhaseOutcome::Failed(ref m) if m.contains("1800s")
        ));
    }
}
