//! Pre-flight gate: conditions checked before any phase may run.

use std::path::Path;

use super::PhaseRegistry;
use crate::config::WardenConfig;
use crate::logging::StatusLog;
use crate::system::SystemCollaborator;

const GIB: u64 = 1024 * 1024 * 1024;

/// One gate condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightCheck {
    pub name: &'static str,
    pub passed: bool,
    /// A failed fatal check closes the gate; non-fatal ones only warn
    pub fatal: bool,
    pub detail: String,
}

impl PreflightCheck {
    fn new(name: &'static str, passed: bool, fatal: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed,
            fatal,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    /// True unless a fatal check failed
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed || !c.fatal)
    }

    pub fn blocking(&self) -> Vec<&PreflightCheck> {
        self.checks
            .iter()
            .filter(|c| c.fatal && !c.passed)
            .collect()
    }

    /// One-line reason listing every blocking check
    pub fn failure_summary(&self) -> String {
        self.blocking()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn log(&self, log: &StatusLog) {
        for check in &self.checks {
            let line = format!("{}: {}", check.name, check.detail);
            match (check.passed, check.fatal) {
                (true, _) => log.success(line),
                (false, true) => log.error(line),
                (false, false) => log.warning(line),
            }
        }
    }
}

/// Evaluate every gate condition. Nothing is mutated.
pub fn run_preflight(
    system: &dyn SystemCollaborator,
    config: &WardenConfig,
    registry: &PhaseRegistry,
) -> PreflightReport {
    let mut checks = Vec::new();

    let root = system.is_root();
    checks.push(PreflightCheck::new(
        "privileges",
        root,
        true,
        if root {
            "running as root"
        } else {
            "root privileges required"
        },
    ));

    checks.push(match system.os_release() {
        Some(os) => {
            let supported = config
                .preflight
                .supported_os
                .iter()
                .any(|s| s.id == os.id && s.version == os.version_id);
            let detail = if supported {
                format!("{} is supported", os.pretty_name)
            } else {
                format!("{} is untested; continuing", os.pretty_name)
            };
            PreflightCheck::new("os", supported, false, detail)
        }
        None => PreflightCheck::new("os", false, false, "cannot read /etc/os-release"),
    });

    let floor = config.preflight.min_free_gib.saturating_mul(GIB);
    checks.push(match system.free_space_bytes(Path::new("/")) {
        Some(free) => PreflightCheck::new(
            "disk",
            free >= floor,
            true,
            format!(
                "{:.1} GiB free on / (need {} GiB)",
                free as f64 / GIB as f64,
                config.preflight.min_free_gib
            ),
        ),
        None => PreflightCheck::new("disk", false, true, "cannot determine free space on /"),
    });

    let timeout = config.timeouts.ping();
    let reachable: Vec<&str> = config
        .preflight
        .reach_hosts
        .iter()
        .map(String::as_str)
        .filter(|host| system.ping(host, timeout))
        .collect();
    checks.push(if reachable.is_empty() {
        PreflightCheck::new(
            "network",
            false,
            true,
            format!(
                "none of {} reachable",
                config.preflight.reach_hosts.join(", ")
            ),
        )
    } else {
        PreflightCheck::new("network", true, true, format!("{} reachable", reachable[0]))
    });

    let missing = registry.missing(&config.preflight.required_phases);
    checks.push(if missing.is_empty() {
        PreflightCheck::new(
            "phases",
            true,
            true,
            format!("{} phase(s) registered", registry.len()),
        )
    } else {
        PreflightCheck::new(
            "phases",
            false,
            true,
            format!("required phase(s) missing: {}", missing.join(", ")),
        )
    });

    PreflightReport { checks }
}
