//! Post-run validation: health checks plus a compliance evaluation.
//!
//! The verdict is advisory. It feeds the final report and never aborts a run.

use std::path::PathBuf;

use super::{Phase, PhaseContext, PhaseOutcome};
use crate::compliance::{self, ComplianceReport};
use crate::config::WardenConfig;
use crate::logging::StatusLog;
use crate::parsers::parse_ufw_status;
use crate::system::SystemCollaborator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
    pub compliance: Option<ComplianceReport>,
    pub compliance_path: Option<PathBuf>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        let mut text = format!(
            "{}: {}/{} health checks",
            if self.passed() { "PASS" } else { "FAIL" },
            passed,
            self.checks.len()
        );
        if let Some(report) = &self.compliance {
            text.push_str(&format!(
                ", {} {}% ({}/{})",
                report.framework, report.percentage, report.score, report.total
            ));
        }
        text
    }
}

fn check(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> ValidationCheck {
    ValidationCheck {
        name: name.into(),
        passed,
        detail: detail.into(),
    }
}

/// Run every validation check and, when configured, a compliance scan.
pub fn run_validation(
    system: &dyn SystemCollaborator,
    log: &StatusLog,
    config: &WardenConfig,
) -> ValidationReport {
    let timeout = config.timeouts.command();
    let mut checks = Vec::new();

    let ufw = system.run("ufw", &["status", "verbose"], timeout);
    let firewall = parse_ufw_status(&ufw.stdout);
    checks.push(check(
        "firewall",
        ufw.success() && firewall.active,
        if firewall.active {
            format!("active, {} rule(s)", firewall.rules.len())
        } else {
            "inactive".to_string()
        },
    ));

    let sshd = system.run("sshd", &["-t"], timeout);
    checks.push(check(
        "sshd-config",
        sshd.success(),
        if sshd.success() {
            "sshd -t accepted the configuration".to_string()
        } else {
            sshd.reason()
        },
    ));

    for service in &config.report.monitored_services {
        let active = system.service_active(service);
        checks.push(check(
            format!("service:{}", service),
            active,
            if active { "active" } else { "not active" },
        ));
    }

    for c in &checks {
        let line = format!("{}: {}", c.name, c.detail);
        if c.passed {
            log.success(line);
        } else {
            log.error(line);
        }
    }

    let mut report = ValidationReport {
        checks,
        ..Default::default()
    };

    match compliance::framework_by_id(&config.report.compliance_framework) {
        Some(framework) => {
            let scored = compliance::evaluate(framework.as_ref(), system);
            log.info(format!(
                "{} compliance: {}% ({}/{})",
                framework.title(),
                scored.percentage,
                scored.score,
                scored.total
            ));
            match compliance::save_report(&scored, &config.paths.report_dir) {
                Ok(path) => report.compliance_path = Some(path),
                Err(e) => log.error(format!("Cannot save compliance report: {}", e)),
            }
            report.compliance = Some(scored);
        }
        None => log.warning(format!(
            "Unknown compliance framework '{}', scan skipped",
            config.report.compliance_framework
        )),
    }

    report
}

/// Final phase of the default sequence
pub struct ValidationPhase;

impl Phase for ValidationPhase {
    fn id(&self) -> &str {
        "validation"
    }

    fn ordinal(&self) -> u32 {
        110
    }

    fn description(&self) -> &str {
        "Verify firewall, SSH and services; score compliance"
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome {
        let report = run_validation(ctx.system, ctx.log, ctx.config);
        if !report.passed() {
            ctx.log
                .warning("Validation found problems; see the final report");
        }
        // Advisory: the verdict travels in the message
        PhaseOutcome::Completed(report.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{CommandOutput, FakeSystem, ServiceState};

    fn config(dir: &std::path::Path) -> WardenConfig {
        WardenConfig::default().rooted_at(dir)
    }

    #[test]
    fn test_validation_passes_on_hardened_host() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy()
            .with_service("fail2ban", ServiceState::Active)
            .with_service("auditd", ServiceState::Active);

        let report = run_validation(&system, &log, &config);
        assert!(report.passed(), "{:?}", report.checks);
        assert!(report.summary().starts_with("PASS: 6/6"));
        assert_eq!(report.compliance.as_ref().map(|r| r.total), Some(14));
        assert!(report.compliance_path.unwrap().exists());
    }

    #[test]
    fn test_failures_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy()
            .with_response("sshd -t", CommandOutput::failed(255, "Bad configuration option: Foo"));

        let report = run_validation(&system, &log, &config);
        assert!(!report.passed());
        let sshd = report.checks.iter().find(|c| c.name == "sshd-config").unwrap();
        assert!(sshd.detail.contains("Bad configuration option"));
        assert!(report.summary().starts_with("FAIL"));
        assert!(log.contains(crate::logging::LogLevel::Error, "sshd-config:"));
    }
}
