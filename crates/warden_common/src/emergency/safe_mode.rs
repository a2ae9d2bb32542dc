//! Safe mode: non-essential services stopped, minimal firewall applied.
//!
//! The flag file records which services were stopped so that leaving safe
//! mode brings back exactly those, even from a later invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;

use super::{EmergencyEngine, RecoveryReport};
use crate::system::ServiceAction;

/// Contents of the safe-mode flag file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeModeState {
    pub entered_at: DateTime<Utc>,
    pub stopped_services: Vec<String>,
}

impl<'a> EmergencyEngine<'a> {
    pub fn in_safe_mode(&self) -> bool {
        self.config.paths.safe_mode_flag.exists()
    }

    fn read_safe_mode_state(&self) -> Option<SafeModeState> {
        let json = fs::read_to_string(&self.config.paths.safe_mode_flag).ok()?;
        serde_json::from_str(&json).ok()
    }

    /// Stop non-essential services and apply the minimal firewall.
    pub fn enter_safe_mode(&self) -> RecoveryReport {
        let mut report = RecoveryReport::new("enter-safe-mode");
        let flag = &self.config.paths.safe_mode_flag;

        if self.in_safe_mode() {
            report.ok(
                self.log,
                format!("Already in safe mode ({} present)", flag.display()),
            );
            return report;
        }

        let mut stopped = Vec::new();
        for service in &self.config.emergency.non_essential_services {
            if !self.system.service_active(service) {
                continue;
            }
            let out = self.system.service_action(service, ServiceAction::Stop);
            if out.success() {
                report.ok(self.log, format!("Stopped {}", service));
                stopped.push(service.clone());
            } else {
                report.fail(self.log, format!("Could not stop {}: {}", service, out.reason()));
            }
        }

        self.apply_minimal_firewall(&mut report);

        let state = SafeModeState {
            entered_at: Utc::now(),
            stopped_services: stopped,
        };
        let written = flag
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| {
                let json = serde_json::to_string_pretty(&state).map_err(std::io::Error::other)?;
                fs::write(flag, json)
            });
        match written {
            Ok(()) => report.ok(self.log, "Safe mode active"),
            Err(e) => report.fail(
                self.log,
                format!("Cannot write safe-mode flag {}: {}", flag.display(), e),
            ),
        }
        report
    }

    /// Restart the services stopped on entry and clear the flag.
    ///
    /// Without a flag this is a successful no-op.
    pub fn exit_safe_mode(&self) -> RecoveryReport {
        let mut report = RecoveryReport::new("exit-safe-mode");
        let flag = &self.config.paths.safe_mode_flag;

        if !self.in_safe_mode() {
            report.ok(self.log, "Not in safe mode; nothing to do");
            return report;
        }

        let services = match self.read_safe_mode_state() {
            Some(state) => state.stopped_services,
            None => {
                report.warn(
                    self.log,
                    "Safe-mode flag unreadable; starting every non-essential service that exists",
                );
                self.config
                    .emergency
                    .non_essential_services
                    .iter()
                    .filter(|s| self.system.service_exists(s))
                    .cloned()
                    .collect()
            }
        };

        for service in &services {
            let out = self.system.service_action(service, ServiceAction::Start);
            if out.success() {
                report.ok(self.log, format!("Started {}", service));
            } else {
                report.fail(self.log, format!("Could not start {}: {}", service, out.reason()));
            }
        }

        match fs::remove_file(flag) {
            Ok(()) => report.ok(self.log, "Safe mode cleared"),
            Err(e) => report.fail(
                self.log,
                format!("Cannot remove safe-mode flag {}: {}", flag.display(), e),
            ),
        }
        report
    }
}
