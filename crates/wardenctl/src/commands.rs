//! Command execution
//!
//! Every command returns the process exit code; library errors travel as
//! `anyhow::Error` and are mapped back through `exit_code_for`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;
use warden_common::backup::{
    cleanup_old_backups, create_snapshot, emergency_rollback, list_backups, restore_directory,
    restore_file,
};
use warden_common::compliance::{
    evaluate, framework_by_id, render_dashboard, render_summary, save_report,
};
use warden_common::emergency::{EmergencyEngine, RecoveryReport};
use warden_common::phases::default_registry;
use warden_common::sequencer::{run_validation, Sequencer};
use warden_common::{
    AutoPrompt, HostSystem, OperatorPrompt, StatusLog, SystemCollaborator, WardenConfig,
    WardenError,
};

use crate::cli::{
    BackupCommands, Cli, Commands, ComplianceCommands, EmergencyCommands, SafeModeCommands,
};
use crate::output;
use crate::prompt::ConsolePrompt;

/// Process exit code for an error that reached the top level
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<WardenError>()
        .map(WardenError::exit_code)
        .unwrap_or(1)
}

/// Resolved settings for one invocation: config file plus flag overrides.
pub struct Session {
    pub config: WardenConfig,
    pub verbose: bool,
    pub interactive: bool,
    pub assume_yes: bool,
}

impl Session {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = WardenConfig::load(cli.config.as_deref())?;
        if let Some(dir) = &cli.backup_root {
            config.paths.backup_root = dir.clone();
        }
        if let Some(dir) = &cli.report_dir {
            config.paths.report_dir = dir.clone();
        }
        if let Some(policy) = cli.on_failure {
            config.sequencer.on_failure = policy.into();
        }

        let interactive = !cli.non_interactive
            && config
                .sequencer
                .interactive
                .unwrap_or_else(console::user_attended);
        debug!(
            interactive,
            on_failure = ?config.sequencer.on_failure,
            backup_root = %config.paths.backup_root.display(),
            "session resolved"
        );

        Ok(Self {
            config,
            verbose: cli.verbose,
            interactive,
            assume_yes: cli.yes,
        })
    }

    fn status_log(&self) -> StatusLog {
        StatusLog::to_file("warden", &self.config.paths.log_file).with_verbose(self.verbose)
    }

    fn recovery_log(&self) -> StatusLog {
        StatusLog::to_file("recovery", &self.config.paths.recovery_log).with_verbose(self.verbose)
    }

    fn prompt(&self) -> Box<dyn OperatorPrompt> {
        if self.interactive {
            Box::new(ConsolePrompt::new(self.assume_yes))
        } else {
            Box::new(AutoPrompt::new(
                self.assume_yes,
                self.config.sequencer.on_failure,
            ))
        }
    }
}

pub fn run(cli: Cli) -> Result<i32> {
    let session = Session::from_cli(&cli)?;
    let system = HostSystem::new();

    match cli.command {
        Commands::Run => run_sequence(&session, &system, None),
        Commands::Phase { id } => run_sequence(&session, &system, Some(&id)),
        Commands::Phases => {
            print!("{}", output::render_phases(&default_registry(&session.config)?));
            Ok(0)
        }
        Commands::Preflight => preflight(&session, &system),
        Commands::Validate => validate(&session, &system),
        Commands::Report => report(&session.config.paths.report_dir),
        Commands::Backup { action } => backup(&session, &system, action),
        Commands::Emergency { action } => emergency(&session, &system, action),
        Commands::Compliance { action } => compliance(&session, &system, action),
    }
}

fn run_sequence(session: &Session, system: &dyn SystemCollaborator, only: Option<&str>) -> Result<i32> {
    let log = session.status_log();
    let prompt = session.prompt();
    let sequencer = Sequencer::new(
        system,
        &log,
        &session.config,
        default_registry(&session.config)?,
        prompt.as_ref(),
    )
    .interactive(session.interactive);

    let run = match only {
        Some(id) => sequencer.run_single(id)?,
        None => sequencer.run_all()?,
    };
    print!("{}", output::render_run(&run));
    Ok(run.exit_code())
}

fn preflight(session: &Session, system: &dyn SystemCollaborator) -> Result<i32> {
    let log = session.status_log();
    let prompt = AutoPrompt::new(false, session.config.sequencer.on_failure);
    let sequencer = Sequencer::new(
        system,
        &log,
        &session.config,
        default_registry(&session.config)?,
        &prompt,
    );
    let report = sequencer.preflight();
    print!("{}", output::render_preflight(&report));
    Ok(if report.passed() {
        0
    } else {
        WardenError::Preflight(String::new()).exit_code()
    })
}

fn validate(session: &Session, system: &dyn SystemCollaborator) -> Result<i32> {
    let log = session.status_log();
    let report = run_validation(system, &log, &session.config);
    print!("{}", output::render_validation(&report));
    Ok(if report.passed() { 0 } else { 1 })
}

/// Newest `final-report-*.txt` in `dir`
pub fn latest_final_report(dir: &Path) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .map(|n| n.starts_with("final-report-") && n.ends_with(".txt"))
                .unwrap_or(false)
        })
        .max()
}

fn report(dir: &Path) -> Result<i32> {
    let path = latest_final_report(dir)
        .ok_or_else(|| anyhow!("no final report in {}; run `wardenctl run` first", dir.display()))?;
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    print!("{}", text);
    Ok(0)
}

fn backup(session: &Session, system: &dyn SystemCollaborator, action: BackupCommands) -> Result<i32> {
    let root = &session.config.paths.backup_root;
    match action {
        BackupCommands::Create => {
            let log = session.status_log();
            let snapshot = create_snapshot(system, root, &session.config.backup.snapshot_paths, &log)?;
            println!(
                "Snapshot {} holds {} item(s)",
                snapshot.dir.display(),
                snapshot.metadata.records.len()
            );
            if snapshot.failed.is_empty() {
                Ok(0)
            } else {
                let missing: Vec<String> =
                    snapshot.failed.iter().map(|p| p.display().to_string()).collect();
                Err(WardenError::backup(format!("not captured: {}", missing.join(", "))).into())
            }
        }
        BackupCommands::List => {
            print!("{}", output::render_backups(&list_backups(root)?));
            Ok(0)
        }
        BackupCommands::Cleanup { days } => {
            let days = days.unwrap_or(session.config.backup.retention_days);
            if days == 0 {
                bail!("retention must be at least one day");
            }
            let summary = cleanup_old_backups(root, days)?;
            print!("{}", output::render_cleanup(&summary, days));
            Ok(0)
        }
        BackupCommands::RestoreFile { backup, target } => {
            let outcome = restore_file(&backup, &target)?;
            println!("Restored {}", outcome.target.display());
            if let Some(before) = outcome.before_restore {
                println!("Previous contents saved to {}", before.display());
            }
            Ok(0)
        }
        BackupCommands::RestoreDir { archive, target } => {
            restore_directory(&archive, &target)?;
            println!("Restored {} from {}", target.display(), archive.display());
            Ok(0)
        }
    }
}

fn recovery_exit(report: &RecoveryReport) -> i32 {
    print!("{}", output::render_recovery(report));
    if report.success {
        0
    } else {
        1
    }
}

fn emergency(
    session: &Session,
    system: &dyn SystemCollaborator,
    action: EmergencyCommands,
) -> Result<i32> {
    let log = session.recovery_log();
    let prompt = session.prompt();
    let engine = EmergencyEngine::new(system, &log, &session.config);

    match action {
        EmergencyCommands::Check => {
            let assessment = engine.check_emergency_state();
            print!("{}", output::render_assessment(&assessment));
            Ok(if assessment.is_emergency { 1 } else { 0 })
        }
        EmergencyCommands::Ssh { set_root_password } => {
            let password = if set_root_password {
                prompt.secret("Temporary root password (empty to skip):")
            } else {
                None
            };
            Ok(recovery_exit(&engine.recover_ssh(password.as_deref())))
        }
        EmergencyCommands::Network => Ok(recovery_exit(&engine.recover_network())),
        EmergencyCommands::Firewall => Ok(recovery_exit(&engine.recover_firewall())),
        EmergencyCommands::Services => Ok(recovery_exit(&engine.recover_services())),
        EmergencyCommands::Disk => Ok(recovery_exit(&engine.recover_disk_space())),
        EmergencyCommands::SafeMode { action } => match action {
            SafeModeCommands::Enter => {
                if !prompt.confirm("Stop non-essential services and reset the firewall?") {
                    return Err(WardenError::Cancelled("safe mode".to_string()).into());
                }
                Ok(recovery_exit(&engine.enter_safe_mode()))
            }
            SafeModeCommands::Exit => Ok(recovery_exit(&engine.exit_safe_mode())),
        },
        EmergencyCommands::Diagnostics => {
            let path = engine.run_diagnostics()?;
            println!("Diagnostics written to {}", path.display());
            Ok(0)
        }
        EmergencyCommands::Rollback => {
            let summary = emergency_rollback(
                system,
                &session.config.paths.backup_root,
                prompt.as_ref(),
                &log,
            )?;
            print!("{}", output::render_rollback(&summary));
            Ok(if summary.success() { 0 } else { 1 })
        }
    }
}

fn compliance(
    session: &Session,
    system: &dyn SystemCollaborator,
    action: ComplianceCommands,
) -> Result<i32> {
    let dir = &session.config.paths.report_dir;
    match action {
        ComplianceCommands::Scan { framework } => {
            let framework = framework_by_id(&framework)
                .ok_or_else(|| anyhow!("unknown framework '{}' (known: cis, nist)", framework))?;
            let report = evaluate(framework.as_ref(), system);
            let path = save_report(&report, dir)?;
            print!("{}", render_summary(&report));
            println!("Saved to {}", path.display());
            Ok(0)
        }
        ComplianceCommands::Dashboard => {
            print!("{}", render_dashboard(dir));
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_exit_code_for_library_errors() {
        let err: anyhow::Error = WardenError::NoSnapshot("/var/backups/warden".into()).into();
        assert_eq!(exit_code_for(&err), 4);
        let err: anyhow::Error = WardenError::Preflight("not root".into()).into();
        assert_eq!(exit_code_for(&err), 2);
        assert_eq!(exit_code_for(&anyhow!("plain")), 1);
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        fs::write(&config, "[sequencer]\non_failure = \"abort\"\ninteractive = true\n").unwrap();
        let cli = Cli::parse_from([
            "wardenctl",
            "--config",
            config.to_str().unwrap(),
            "--on-failure",
            "continue",
            "--non-interactive",
            "--report-dir",
            "/tmp/warden-reports",
            "compliance",
            "dashboard",
        ]);

        let session = Session::from_cli(&cli).unwrap();
        assert_eq!(
            session.config.sequencer.on_failure,
            warden_common::OnFailure::Continue
        );
        assert!(!session.interactive);
        assert_eq!(
            session.config.paths.report_dir,
            PathBuf::from("/tmp/warden-reports")
        );
    }

    #[test]
    fn test_latest_final_report() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_final_report(dir.path()).is_none());
        fs::write(dir.path().join("final-report-20240101_000000.txt"), "old").unwrap();
        fs::write(dir.path().join("final-report-20240301_000000.txt"), "new").unwrap();
        fs::write(dir.path().join("cis-20240401_000000.json"), "{}").unwrap();
        assert_eq!(
            latest_final_report(dir.path()).unwrap(),
            dir.path().join("final-report-20240301_000000.txt")
        );
    }
}
