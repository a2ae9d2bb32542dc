//! CLI integration tests for wardenctl
//!
//! Runs the built binary against a config rooted in a temp directory. Only
//! commands that leave the host untouched are exercised here:
//! - help and phase listing
//! - backup list, compliance dashboard, report
//! - rollback without a snapshot and unknown phase ids (exit codes)

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn wardenctl(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wardenctl"))
        .arg("--config")
        .arg(config)
        .arg("--non-interactive")
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("WARDEN_CONFIG")
        .output()
        .expect("Failed to run wardenctl")
}

/// Config whose every path lives under the temp dir
fn sandbox() -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = root.join("config.toml");
    fs::write(
        &config,
        format!(
            "[paths]\n\
             backup_root = \"{0}/backups\"\n\
             report_dir = \"{0}/reports\"\n\
             log_file = \"{0}/log/warden.log\"\n\
             recovery_log = \"{0}/log/recovery.log\"\n\
             lock_file = \"{0}/run/warden.lock\"\n\
             safe_mode_flag = \"{0}/state/safe-mode\"\n",
            root.display()
        ),
    )
    .unwrap();
    (dir, config)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_help_lists_subcommands() {
    let output = Command::new(env!("CARGO_BIN_EXE_wardenctl"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["run", "phase", "preflight", "validate", "report", "backup", "emergency", "compliance"] {
        assert!(text.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_phases_are_listed_in_order() {
    let (_dir, config) = sandbox();
    let output = wardenctl(&config, &["phases"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let text = stdout(&output);
    let backup = text.find("system-backup").unwrap();
    let firewall = text.find("firewall").unwrap();
    let validation = text.find("validation").unwrap();
    assert!(backup < firewall && firewall < validation);
    assert!(text.contains("110"));
}

#[test]
fn test_empty_backup_listing() {
    let (_dir, config) = sandbox();
    let output = wardenctl(&config, &["backup", "list"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("No backups found"));
}

#[test]
fn test_dashboard_without_reports() {
    let (_dir, config) = sandbox();
    let output = wardenctl(&config, &["compliance", "dashboard"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("CIS"));
    assert!(text.contains("NIST"));
    assert_eq!(text.matches("N/A").count(), 2);
}

#[test]
fn test_report_without_run_fails() {
    let (_dir, config) = sandbox();
    let output = wardenctl(&config, &["report"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no final report"));
}

#[test]
fn test_rollback_without_snapshot_exits_4() {
    let (dir, config) = sandbox();
    let output = wardenctl(&config, &["emergency", "rollback", "--yes"]);
    assert_eq!(output.status.code(), Some(4), "{}", stderr(&output));
    assert!(!dir.path().join("backups").join("emergency").exists());
}

#[test]
fn test_unknown_phase_is_an_error() {
    let (_dir, config) = sandbox();
    let output = wardenctl(&config, &["phase", "no-such-phase"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no-such-phase"));
}

#[test]
fn test_missing_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = wardenctl(&dir.path().join("absent.toml"), &["phases"]);
    assert_eq!(output.status.code(), Some(78));
}
