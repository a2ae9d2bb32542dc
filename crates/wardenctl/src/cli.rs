//! CLI - Command-line argument parsing
//!
//! Defines the CLI structure using clap. Execution lives in `commands`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use warden_common::OnFailure;

/// Warden host provisioning and hardening
#[derive(Parser, Debug)]
#[command(name = "wardenctl")]
#[command(about = "Warden - single-host provisioning, hardening and recovery", long_about = None)]
#[command(version = env!("WARDEN_VERSION"))]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file (overrides $WARDEN_CONFIG and /etc/warden/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show DEBUG status lines on the console
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Policy for failed phases when nobody is asked
    #[arg(long, global = true, value_enum)]
    pub on_failure: Option<FailurePolicy>,

    /// Never prompt; failed phases follow the configured policy
    #[arg(long, global = true)]
    pub non_interactive: bool,

    /// Answer yes to confirmations (rollback, safe mode)
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Override paths.backup_root
    #[arg(long, global = true, value_name = "DIR")]
    pub backup_root: Option<PathBuf>,

    /// Override paths.report_dir
    #[arg(long, global = true, value_name = "DIR")]
    pub report_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    Continue,
    Abort,
}

impl From<FailurePolicy> for OnFailure {
    fn from(policy: FailurePolicy) -> Self {
        match policy {
            FailurePolicy::Continue => OnFailure::Continue,
            FailurePolicy::Abort => OnFailure::Abort,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full phase sequence behind the pre-flight gate
    Run,

    /// Run a single phase by id
    Phase {
        /// Phase id, see `wardenctl phases`
        id: String,
    },

    /// List registered phases in execution order
    Phases,

    /// Run the pre-flight checks only
    Preflight,

    /// Run post-run validation only
    Validate,

    /// Print the latest final report
    Report,

    /// Backups and restores
    Backup {
        #[command(subcommand)]
        action: BackupCommands,
    },

    /// Emergency detection and recovery
    Emergency {
        #[command(subcommand)]
        action: EmergencyCommands,
    },

    /// Compliance scoring
    Compliance {
        #[command(subcommand)]
        action: ComplianceCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Snapshot the critical system paths
    Create,

    /// List backup artifacts
    List,

    /// Delete artifacts older than the retention window
    Cleanup {
        /// Retention in days (default: backup.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Restore one file from a backup
    RestoreFile {
        backup: PathBuf,
        target: PathBuf,
    },

    /// Extract a directory archive
    RestoreDir {
        archive: PathBuf,
        target: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum EmergencyCommands {
    /// Assess the host without changing anything
    Check,

    /// Restore SSH access
    Ssh {
        /// Ask for a temporary root password
        #[arg(long)]
        set_root_password: bool,
    },

    /// Restore network connectivity and DNS
    Network,

    /// Reset the firewall to the minimal policy
    Firewall,

    /// Restart failed services
    Services,

    /// Free disk space
    Disk,

    /// Enter or leave safe mode
    SafeMode {
        #[command(subcommand)]
        action: SafeModeCommands,
    },

    /// Write a diagnostics bundle to the report directory
    Diagnostics,

    /// Restore the latest system snapshot
    Rollback,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum SafeModeCommands {
    /// Stop non-essential services and apply the minimal firewall
    Enter,
    /// Restart the services stopped on entry
    Exit,
}

#[derive(Subcommand, Debug)]
pub enum ComplianceCommands {
    /// Evaluate a framework and save the report
    Scan {
        /// Framework id (cis, nist)
        #[arg(long, default_value = "cis")]
        framework: String,
    },

    /// Latest score of every framework
    Dashboard,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "wardenctl",
            "run",
            "--non-interactive",
            "--on-failure",
            "continue",
            "--backup-root",
            "/tmp/b",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert!(cli.non_interactive);
        assert_eq!(cli.on_failure, Some(FailurePolicy::Continue));
        assert_eq!(cli.backup_root, Some(PathBuf::from("/tmp/b")));
    }

    #[test]
    fn test_nested_subcommands() {
        let cli = Cli::try_parse_from(["wardenctl", "emergency", "safe-mode", "exit"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Emergency {
                action: EmergencyCommands::SafeMode {
                    action: SafeModeCommands::Exit
                }
            }
        ));

        let cli = Cli::try_parse_from(["wardenctl", "backup", "restore-file", "a.backup", "/etc/a"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Backup {
                action: BackupCommands::RestoreFile { .. }
            }
        ));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(Cli::try_parse_from(["wardenctl", "run", "--on-failure", "maybe"]).is_err());
    }
}
