//! Emergency detection and recovery
//!
//! `check_emergency_state` is purely diagnostic. Recovery actions are
//! independent of the sequencer, individually idempotent, and log every step
//! to the recovery log.

mod diagnostics;
mod recovery;
mod safe_mode;

pub use recovery::{DNS_FALLBACK_DROPIN, EMERGENCY_SSH_FRAGMENT};
pub use safe_mode::SafeModeState;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backup::backup_contents;
use crate::config::WardenConfig;
use crate::logging::StatusLog;
use crate::parsers::{kernel_log_markers, parse_ufw_status};
use crate::system::{ssh_service_name, SystemCollaborator};

/// Result of one assessment; recomputed on every call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyAssessment {
    pub is_emergency: bool,
    pub issues: Vec<String>,
}

impl EmergencyAssessment {
    fn flag(&mut self, issue: String) {
        self.is_emergency = true;
        self.issues.push(issue);
    }
}

/// Outcome of a recovery action with the steps taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub action: String,
    pub success: bool,
    pub steps: Vec<String>,
    /// Files changed without a safety copy
    #[serde(default)]
    pub unsaved: Vec<PathBuf>,
}

impl RecoveryReport {
    fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            steps: Vec::new(),
            unsaved: Vec::new(),
        }
    }

    /// True when some file was changed with no copy to roll back to
    pub fn backup_failed(&self) -> bool {
        !self.unsaved.is_empty()
    }

    fn backup_failure(&mut self, log: &StatusLog, path: &Path, reason: &str) {
        let step = format!(
            "No safety copy of {} ({}); continuing without one",
            path.display(),
            reason
        );
        log.error(&step);
        self.steps.push(format!("backup failed: {}", step));
        self.unsaved.push(path.to_path_buf());
    }

    fn ok(&mut self, log: &StatusLog, step: impl Into<String>) {
        let step = step.into();
        log.success(&step);
        self.steps.push(step);
    }

    fn note(&mut self, log: &StatusLog, step: impl Into<String>) {
        let step = step.into();
        log.info(&step);
        self.steps.push(step);
    }

    fn warn(&mut self, log: &StatusLog, step: impl Into<String>) {
        let step = step.into();
        log.warning(&step);
        self.steps.push(format!("warning: {}", step));
    }

    fn fail(&mut self, log: &StatusLog, step: impl Into<String>) {
        let step = step.into();
        log.error(&step);
        self.steps.push(format!("failed: {}", step));
        self.success = false;
    }
}

/// Diagnoses and repairs a degraded host.
pub struct EmergencyEngine<'a> {
    system: &'a dyn SystemCollaborator,
    log: &'a StatusLog,
    config: &'a WardenConfig,
}

impl<'a> EmergencyEngine<'a> {
    pub fn new(
        system: &'a dyn SystemCollaborator,
        log: &'a StatusLog,
        config: &'a WardenConfig,
    ) -> Self {
        Self {
            system,
            log,
            config,
        }
    }

    /// Evaluate every emergency predicate. Never mutates the host.
    pub fn check_emergency_state(&self) -> EmergencyAssessment {
        let mut assessment = EmergencyAssessment::default();
        self.log.info("Assessing host state");

        let ssh = ssh_service_name(self.system);
        if !self.system.service_active(ssh) {
            assessment.flag(format!("SSH service ({}) is not active", ssh));
        }

        let ping_timeout = self.config.timeouts.ping();
        let hosts = &self.config.preflight.reach_hosts;
        if !hosts.iter().any(|h| self.system.ping(h, ping_timeout)) {
            assessment.flag(format!(
                "No network connectivity (no reply from {})",
                hosts.join(", ")
            ));
        }

        let threshold = self.config.emergency.disk_critical_percent;
        match self.system.disk_usage_percent(Path::new("/")) {
            Some(usage) if usage > threshold => assessment.flag(format!(
                "Critical disk space: / is {}% full (threshold {}%)",
                usage, threshold
            )),
            Some(_) => {}
            None => self.log.debug("Disk usage of / unavailable"),
        }

        let cpus = self.system.cpu_count().max(1);
        let load = self.system.load_average_1m();
        let limit = self.config.emergency.load_factor * cpus as f64;
        if load > limit {
            assessment.flag(format!(
                "High load average: {:.2} exceeds {} x {} cores",
                load, self.config.emergency.load_factor, cpus
            ));
        }

        let kernel_log = self.system.run(
            "journalctl",
            &[
                "-k",
                "--since",
                self.config.emergency.kernel_log_window.as_str(),
                "--no-pager",
            ],
            self.config.timeouts.command(),
        );
        if kernel_log.success() {
            let markers = kernel_log_markers(&kernel_log.stdout);
            if !markers.is_empty() {
                assessment.flag(format!(
                    "Kernel log reports critical events since {}: {}",
                    self.config.emergency.kernel_log_window,
                    markers.join(", ")
                ));
            }
        } else {
            self.log
                .debug(format!("Kernel log unavailable: {}", kernel_log.reason()));
        }

        let firewall = self
            .system
            .run("ufw", &["status", "verbose"], self.config.timeouts.command());
        if !firewall.success() {
            assessment.flag(format!("Firewall status unavailable: {}", firewall.reason()));
        } else if !parse_ufw_status(&firewall.stdout).active {
            assessment.flag("Firewall is not active".to_string());
        }

        if assessment.is_emergency {
            for issue in &assessment.issues {
                self.log.warning(issue);
            }
        } else {
            self.log.success("No emergency conditions detected");
        }
        assessment
    }

    /// Where recovery actions keep copies of files they are about to change
    fn safety_dir(&self) -> PathBuf {
        self.config.paths.backup_root.join("emergency")
    }

    /// Save a host file before changing it. A missing file needs no copy.
    fn safety_copy(&self, report: &mut RecoveryReport, path: &Path) {
        if !self.system.path_exists(path) {
            return;
        }
        let saved = self
            .system
            .read_file(path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                backup_contents(path, &content, &self.safety_dir()).map_err(|e| e.to_string())
            });
        match saved {
            Ok(record) => report.note(
                self.log,
                format!("Saved {} to {}", path.display(), record.backup.display()),
            ),
            Err(e) => report.backup_failure(self.log, path, &e),
        }
    }
}
