//! Final run report (plain text)

use std::fs;
use std::path::PathBuf;

use super::RunContext;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::system::SystemCollaborator;

/// Reminders printed at the end of every report
pub const OPERATOR_CHECKLIST: &[&str] = &[
    "Open a second SSH session and confirm key login before closing this one",
    "Disable SSH password authentication once key login is confirmed",
    "Review listening ports (ss -tuln) against the firewall allow list",
    "Copy the backup directory to another host",
    "Check fail2ban jails with fail2ban-client status",
    "Schedule regular compliance scans (wardenctl compliance scan)",
    "Reboot if a kernel update was installed",
];

pub fn render_final_report(
    run: &RunContext,
    system: &dyn SystemCollaborator,
    config: &WardenConfig,
) -> String {
    let mut out = String::new();
    out.push_str("warden final report\n");
    out.push_str("===================\n\n");
    out.push_str(&format!("Host:      {}\n", system.hostname()));
    out.push_str(&format!(
        "OS:        {}\n",
        system
            .os_release()
            .map(|os| os.pretty_name)
            .unwrap_or_else(|| "unknown".to_string())
    ));
    out.push_str(&format!("Kernel:    {}\n", system.kernel_version()));
    out.push_str(&format!("Run:       {}\n", run.run_id));
    out.push_str(&format!("Backups:   {}\n", run.backup_dir.display()));
    out.push_str(&format!("Version:   {}\n", crate::VERSION));
    if let Some(phase) = &run.aborted_after {
        out.push_str(&format!("Outcome:   aborted after {}\n", phase));
    } else {
        out.push_str("Outcome:   finished\n");
    }

    out.push_str("\nPhases\n------\n");
    out.push_str(&run.ledger.render_table());

    out.push_str("\nServices\n--------\n");
    for service in &config.report.monitored_services {
        let state = if system.service_active(service) {
            "active"
        } else if system.service_exists(service) {
            "inactive"
        } else {
            "not installed"
        };
        out.push_str(&format!("  {:<20} {}\n", service, state));
    }

    out.push_str("\nValidation\n----------\n");
    match run.ledger.get("validation") {
        Some(result) if !result.message.is_empty() => {
            out.push_str(&format!("  {}\n", result.message))
        }
        Some(result) => out.push_str(&format!("  {}\n", result.status.as_str())),
        None => out.push_str("  not run\n"),
    }

    out.push_str("\nChecklist\n---------\n");
    for item in OPERATOR_CHECKLIST {
        out.push_str(&format!("  [ ] {}\n", item));
    }
    out
}

/// Write `final-report-<timestamp>.txt` to the report directory.
pub fn write_final_report(
    run: &RunContext,
    system: &dyn SystemCollaborator,
    config: &WardenConfig,
) -> Result<PathBuf> {
    let dir = &config.paths.report_dir;
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("final-report-{}.txt", crate::timestamp()));
    fs::write(&path, render_final_report(run, system, config))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{PhaseResult, PhaseStatus};
    use crate::system::{FakeSystem, ServiceState};
    use chrono::Utc;

    #[test]
    fn test_report_sections() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let system = FakeSystem::healthy().with_service("fail2ban", ServiceState::Inactive);

        let mut run = RunContext::new(config.paths.backup_root.join("20250101_000000"));
        let now = Utc::now();
        run.ledger.record(PhaseResult {
            phase_id: "firewall".to_string(),
            ordinal: 50,
            status: PhaseStatus::Failed,
            started: now,
            finished: now,
            message: "ufw enable failed".to_string(),
        });
        run.aborted_after = Some("firewall".to_string());

        let path = write_final_report(&run, &system, &config).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("final-report-") && name.ends_with(".txt"));

        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("aborted after firewall"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("ufw enable failed"));
        assert!(text.contains("fail2ban             inactive"));
        assert!(text.contains("auditd               not installed"));
        assert!(text.contains("not run"));
        for item in OPERATOR_CHECKLIST {
            assert!(text.contains(item));
        }
    }
}
