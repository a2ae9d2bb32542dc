//! Output formatting - ASCII-only terminal rendering
//!
//! Renderers return strings; `commands` decides where they go.

use owo_colors::OwoColorize;
use warden_common::backup::{BackupListing, CleanupSummary, RollbackSummary};
use warden_common::emergency::{EmergencyAssessment, RecoveryReport};
use warden_common::sequencer::{
    PhaseRegistry, PhaseStatus, PreflightReport, RunContext, ValidationReport,
};

pub const SEPARATOR: &str = "------------------------------------------------------------";

fn tag(ok: bool) -> String {
    if ok {
        "[ OK ]".green().to_string()
    } else {
        "[FAIL]".red().to_string()
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

pub fn render_phases(registry: &PhaseRegistry) -> String {
    let mut out = format!("{:<5} {:<20} {}\n", "ORD", "PHASE", "DESCRIPTION");
    for phase in registry.iter() {
        out.push_str(&format!(
            "{:<5} {:<20} {}\n",
            phase.ordinal(),
            phase.id(),
            phase.description()
        ));
        if !phase.depends_on().is_empty() {
            out.push_str(&format!(
                "{:<5} {:<20} after: {}\n",
                "",
                "",
                phase.depends_on().join(", ")
            ));
        }
    }
    out
}

pub fn render_preflight(report: &PreflightReport) -> String {
    let mut out = String::from("[PRE-FLIGHT]\n");
    for check in &report.checks {
        let marker = match (check.passed, check.fatal) {
            (true, _) => tag(true),
            (false, true) => tag(false),
            (false, false) => "[WARN]".yellow().to_string(),
        };
        out.push_str(&format!("  {} {:<10} {}\n", marker, check.name, check.detail));
    }
    out.push_str(&format!(
        "\nGate: {}\n",
        if report.passed() {
            "open".green().to_string()
        } else {
            "closed".red().to_string()
        }
    ));
    out
}

pub fn render_run(run: &RunContext) -> String {
    let mut out = format!("{}\n{}", SEPARATOR, run.ledger.render_table());
    if let Some(failed) = &run.aborted_after {
        out.push_str(&format!(
            "\n{} run aborted after {}\n",
            "[FAIL]".red(),
            failed
        ));
    } else if run.ledger.count(PhaseStatus::Failed) > 0 {
        out.push_str(&format!(
            "\n{} finished with failed phases\n",
            "[WARN]".yellow()
        ));
    } else {
        out.push_str(&format!("\n{} all phases finished\n", tag(true)));
    }
    if let Some(path) = &run.report_path {
        out.push_str(&format!("Final report: {}\n", path.display()));
    }
    out.push_str(&format!("Safety copies: {}\n", run.backup_dir.display()));
    out
}

pub fn render_validation(report: &ValidationReport) -> String {
    let mut out = String::from("[VALIDATION]\n");
    for check in &report.checks {
        out.push_str(&format!(
            "  {} {:<20} {}\n",
            tag(check.passed),
            check.name,
            check.detail
        ));
    }
    out.push_str(&format!("\n{}\n", report.summary()));
    if let Some(path) = &report.compliance_path {
        out.push_str(&format!("Compliance report: {}\n", path.display()));
    }
    out
}

pub fn render_assessment(assessment: &EmergencyAssessment) -> String {
    if !assessment.is_emergency {
        return format!("{} no emergency conditions detected\n", tag(true));
    }
    let mut out = format!(
        "{} {} issue(s) detected\n",
        "[EMERGENCY]".red().bold(),
        assessment.issues.len()
    );
    for issue in &assessment.issues {
        out.push_str(&format!("  * {}\n", issue));
    }
    out.push_str("\nRecovery: wardenctl emergency <ssh|network|firewall|services|disk>\n");
    out
}

pub fn render_recovery(report: &RecoveryReport) -> String {
    let mut out = format!("{} {}\n", tag(report.success), report.action);
    for step in &report.steps {
        out.push_str(&format!("  - {}\n", step));
    }
    if report.backup_failed() {
        out.push_str(&format!(
            "{} changed without a safety copy:\n",
            "[BACKUP FAILED]".red().bold()
        ));
        for path in &report.unsaved {
            out.push_str(&format!("  ! {}\n", path.display()));
        }
    }
    out
}

pub fn render_backups(listings: &[BackupListing]) -> String {
    if listings.is_empty() {
        return "No backups found\n".to_string();
    }
    let mut out = format!("{:<50} {:<9} {:>10}  {}\n", "NAME", "KIND", "SIZE", "MODIFIED");
    for entry in listings {
        out.push_str(&format!(
            "{:<50} {:<9} {:>10}  {}\n",
            entry.name,
            format!("{:?}", entry.kind).to_lowercase(),
            human_size(entry.size),
            entry.modified.format("%Y-%m-%d %H:%M")
        ));
    }
    out
}

pub fn render_cleanup(summary: &CleanupSummary, retention_days: u32) -> String {
    let mut out = format!(
        "Removed {} artifact(s) older than {} day(s), kept {}\n",
        summary.removed.len(),
        retention_days,
        summary.kept
    );
    for path in &summary.removed {
        out.push_str(&format!("  - {}\n", path.display()));
    }
    if !summary.pruned_dirs.is_empty() {
        out.push_str(&format!(
            "Pruned {} empty director(ies)\n",
            summary.pruned_dirs.len()
        ));
    }
    out
}

pub fn render_rollback(summary: &RollbackSummary) -> String {
    let mut out = format!(
        "{} rollback from {}\n",
        tag(summary.success()),
        summary.snapshot.display()
    );
    for path in &summary.restored {
        out.push_str(&format!("  restored  {}\n", path.display()));
    }
    for step in &summary.reloaded {
        out.push_str(&format!("  applied   {}\n", step));
    }
    for failure in &summary.failed {
        out.push_str(&format!("  {}    {}\n", "FAILED".red(), failure));
    }
    if !summary.success() {
        out.push_str("\nRun `wardenctl emergency diagnostics` now.\n");
    }
    out
}

/// Display an error on stderr
pub fn display_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red(), message);
}
