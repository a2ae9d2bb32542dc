//! Configuration management for warden.
//!
//! Loads settings from /etc/warden/config.toml (or $WARDEN_CONFIG) or uses defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, WardenError};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/warden/config.toml";

/// Environment override for the config file path
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";

/// Upper bound for `preflight.min_free_gib` (1 PiB)
const MAX_MIN_FREE_GIB: u64 = 1 << 20;

/// What the sequencer does with a failed phase when nobody is at the keyboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    Continue,
    #[default]
    Abort,
}

impl fmt::Display for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnFailure::Continue => write!(f, "continue"),
            OnFailure::Abort => write!(f, "abort"),
        }
    }
}

impl FromStr for OnFailure {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(OnFailure::Continue),
            "abort" => Ok(OnFailure::Abort),
            other => Err(WardenError::Config(format!(
                "on_failure must be 'continue' or 'abort', got '{}'",
                other
            ))),
        }
    }
}

/// Security scan depth used by the security-scan phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Quick,
    Full,
}

/// Filesystem locations owned by warden
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    #[serde(default = "default_recovery_log")]
    pub recovery_log: PathBuf,

    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Marker file present while the host is in safe mode
    #[serde(default = "default_safe_mode_flag")]
    pub safe_mode_flag: PathBuf,
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/var/backups/warden")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("/var/lib/warden/reports")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/var/log/warden/warden.log")
}

fn default_recovery_log() -> PathBuf {
    PathBuf::from("/var/log/warden/recovery.log")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/warden/warden.lock")
}

fn default_safe_mode_flag() -> PathBuf {
    PathBuf::from("/var/lib/warden/safe-mode")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
            report_dir: default_report_dir(),
            log_file: default_log_file(),
            recovery_log: default_recovery_log(),
            lock_file: default_lock_file(),
            safe_mode_flag: default_safe_mode_flag(),
        }
    }
}

/// Supported operating system entry (os-release ID + VERSION_ID)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedOs {
    pub id: String,
    pub version: String,
}

impl SupportedOs {
    fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
        }
    }
}

/// Pre-flight gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Minimum free space on / in GiB
    #[serde(default = "default_min_free_gib")]
    pub min_free_gib: u64,

    /// Hosts pinged for network reachability; one answering is enough
    #[serde(default = "default_reach_hosts")]
    pub reach_hosts: Vec<String>,

    #[serde(default = "default_supported_os")]
    pub supported_os: Vec<SupportedOs>,

    /// Phases that must be registered for a run to start
    #[serde(default = "default_required_phases")]
    pub required_phases: Vec<String>,
}

fn default_min_free_gib() -> u64 {
    5
}

fn default_reach_hosts() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()]
}

fn default_supported_os() -> Vec<SupportedOs> {
    vec![
        SupportedOs::new("ubuntu", "20.04"),
        SupportedOs::new("ubuntu", "22.04"),
        SupportedOs::new("ubuntu", "24.04"),
        SupportedOs::new("debian", "11"),
        SupportedOs::new("debian", "12"),
    ]
}

fn default_required_phases() -> Vec<String> {
    ["system-backup", "ssh-hardening", "firewall", "validation"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_free_gib: default_min_free_gib(),
            reach_hosts: default_reach_hosts(),
            supported_os: default_supported_os(),
            required_phases: default_required_phases(),
        }
    }
}

/// Phase sequencer behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Policy for failed phases in non-interactive runs
    #[serde(default)]
    pub on_failure: OnFailure,

    /// Force interactive/non-interactive; None means detect a TTY
    #[serde(default)]
    pub interactive: Option<bool>,
}

/// Hardening choices that shape the built-in phases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardeningConfig {
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Leave PasswordAuthentication on until keys are confirmed to work
    #[serde(default)]
    pub disable_password_auth: bool,

    /// Extra ufw allow rules beyond SSH (e.g. "80/tcp")
    #[serde(default)]
    pub firewall_allow: Vec<String>,

    #[serde(default = "default_base_packages")]
    pub base_packages: Vec<String>,

    #[serde(default)]
    pub scan_mode: ScanMode,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_base_packages() -> Vec<String> {
    [
        "ufw",
        "fail2ban",
        "auditd",
        "unattended-upgrades",
        "rkhunter",
        "lynis",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for HardeningConfig {
    fn default() -> Self {
        Self {
            ssh_port: default_ssh_port(),
            disable_password_auth: false,
            firewall_allow: Vec::new(),
            base_packages: default_base_packages(),
            scan_mode: ScanMode::default(),
        }
    }
}

/// Backup retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Paths captured by the system snapshot
    #[serde(default = "default_snapshot_paths")]
    pub snapshot_paths: Vec<PathBuf>,
}

fn default_retention_days() -> u32 {
    30
}

fn default_snapshot_paths() -> Vec<PathBuf> {
    crate::backup::CRITICAL_PATHS
        .iter()
        .map(PathBuf::from)
        .collect()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            snapshot_paths: default_snapshot_paths(),
        }
    }
}

/// Emergency detection thresholds and recovery choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyConfig {
    /// Disk usage above this percentage is an emergency
    #[serde(default = "default_disk_critical")]
    pub disk_critical_percent: u8,

    /// Load average above factor x cores is an emergency
    #[serde(default = "default_load_factor")]
    pub load_factor: f64,

    /// journalctl --since value for the kernel log scan
    #[serde(default = "default_kernel_log_window")]
    pub kernel_log_window: String,

    #[serde(default = "default_dns_fallback")]
    pub dns_fallback: Vec<String>,

    /// Services stopped on entering safe mode
    #[serde(default = "default_non_essential")]
    pub non_essential_services: Vec<String>,

    /// Days of journal kept by the disk space recovery
    #[serde(default = "default_journal_keep_days")]
    pub journal_keep_days: u32,
}

fn default_disk_critical() -> u8 {
    95
}

fn default_load_factor() -> f64 {
    4.0
}

fn default_kernel_log_window() -> String {
    "1 hour ago".to_string()
}

fn default_dns_fallback() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

fn default_non_essential() -> Vec<String> {
    [
        "apache2",
        "nginx",
        "mysql",
        "postgresql",
        "docker",
        "containerd",
        "cups",
        "avahi-daemon",
        "bluetooth",
        "snapd",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_journal_keep_days() -> u32 {
    7
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            disk_critical_percent: default_disk_critical(),
            load_factor: default_load_factor(),
            kernel_log_window: default_kernel_log_window(),
            dns_fallback: default_dns_fallback(),
            non_essential_services: default_non_essential(),
            journal_keep_days: default_journal_keep_days(),
        }
    }
}

/// Report contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Services whose state is listed in the final report and checked by validation
    #[serde(default = "default_monitored_services")]
    pub monitored_services: Vec<String>,

    /// Framework evaluated by the validation phase
    #[serde(default = "default_framework")]
    pub compliance_framework: String,
}

fn default_monitored_services() -> Vec<String> {
    ["ssh", "ufw", "fail2ban", "auditd"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_framework() -> String {
    "cis".to_string()
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            monitored_services: default_monitored_services(),
            compliance_framework: default_framework(),
        }
    }
}

/// Timeout ceilings for external commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Default ceiling for any external command
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Bounded full security scan
    #[serde(default = "default_full_scan_timeout")]
    pub full_scan_secs: u64,

    /// Bounded quick security scan
    #[serde(default = "default_quick_scan_timeout")]
    pub quick_scan_secs: u64,

    /// Single ping
    #[serde(default = "default_ping_timeout")]
    pub ping_secs: u64,
}

fn default_command_timeout() -> u64 {
    300
}

fn default_full_scan_timeout() -> u64 {
    1800
}

fn default_quick_scan_timeout() -> u64 {
    300
}

fn default_ping_timeout() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: default_command_timeout(),
            full_scan_secs: default_full_scan_timeout(),
            quick_scan_secs: default_quick_scan_timeout(),
            ping_secs: default_ping_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn ping(&self) -> Duration {
        Duration::from_secs(self.ping_secs)
    }
}

/// Complete warden configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub preflight: PreflightConfig,

    #[serde(default)]
    pub sequencer: SequencerConfig,

    #[serde(default)]
    pub hardening: HardeningConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub emergency: EmergencyConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl WardenConfig {
    /// Load from an explicit path, $WARDEN_CONFIG, or the system path.
    ///
    /// A missing file at the default location yields defaults; a missing file
    /// that was asked for explicitly is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let path = Path::new(CONFIG_PATH);
        if path.exists() {
            Self::from_file(path)
        } else {
            debug!("No config at {}, using defaults", CONFIG_PATH);
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WardenError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: WardenConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("paths.backup_root", &self.paths.backup_root),
            ("paths.report_dir", &self.paths.report_dir),
            ("paths.log_file", &self.paths.log_file),
            ("paths.recovery_log", &self.paths.recovery_log),
            ("paths.lock_file", &self.paths.lock_file),
            ("paths.safe_mode_flag", &self.paths.safe_mode_flag),
        ];
        for (key, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(WardenError::Config(format!("{} cannot be empty", key)));
            }
        }

        if self.backup.retention_days == 0 {
            return Err(WardenError::Config(
                "backup.retention_days must be at least 1".to_string(),
            ));
        }

        if self.emergency.disk_critical_percent == 0 || self.emergency.disk_critical_percent > 100 {
            return Err(WardenError::Config(
                "emergency.disk_critical_percent must be within 1..=100".to_string(),
            ));
        }

        if self.emergency.load_factor <= 0.0 {
            return Err(WardenError::Config(
                "emergency.load_factor must be positive".to_string(),
            ));
        }

        let timeouts = [
            ("timeouts.command_secs", self.timeouts.command_secs),
            ("timeouts.full_scan_secs", self.timeouts.full_scan_secs),
            ("timeouts.quick_scan_secs", self.timeouts.quick_scan_secs),
            ("timeouts.ping_secs", self.timeouts.ping_secs),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                return Err(WardenError::Config(format!("{} must be non-zero", key)));
            }
        }

        if self.preflight.min_free_gib > MAX_MIN_FREE_GIB {
            return Err(WardenError::Config(format!(
                "preflight.min_free_gib must be at most {}",
                MAX_MIN_FREE_GIB
            )));
        }

        if self.preflight.reach_hosts.is_empty() {
            return Err(WardenError::Config(
                "preflight.reach_hosts needs at least one host".to_string(),
            ));
        }

        Ok(())
    }

    /// Point every warden-owned path below `root` (used by tests and --prefix runs).
    pub fn rooted_at(mut self, root: &Path) -> Self {
        self.paths.backup_root = root.join("backups");
        self.paths.report_dir = root.join("reports");
        self.paths.log_file = root.join("log/warden.log");
        self.paths.recovery_log = root.join("log/recovery.log");
        self.paths.lock_file = root.join("run/warden.lock");
        self.paths.safe_mode_flag = root.join("state/safe-mode");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WardenConfig::default();
        assert_eq!(config.preflight.min_free_gib, 5);
        assert_eq!(config.preflight.reach_hosts, vec!["8.8.8.8", "1.1.1.1"]);
        assert_eq!(config.sequencer.on_failure, OnFailure::Abort);
        assert_eq!(config.emergency.disk_critical_percent, 95);
        assert_eq!(config.backup.retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = WardenConfig::from_toml(
            r#"
            [sequencer]
            on_failure = "continue"

            [backup]
            retention_days = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.sequencer.on_failure, OnFailure::Continue);
        assert_eq!(config.backup.retention_days, 7);
        assert_eq!(config.timeouts.full_scan_secs, 1800);
        assert_eq!(config.paths.backup_root, PathBuf::from("/var/backups/warden"));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let err = WardenConfig::from_toml("[backup]\nretention_days = 0\n").unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[test]
    fn test_absurd_free_space_floor_rejected() {
        let config = WardenConfig::from_toml("[preflight]\nmin_free_gib = 2000000\n");
        assert!(matches!(config, Err(WardenError::Config(_))));
    }

    #[test]
    fn test_bad_disk_threshold_rejected() {
        let err =
            WardenConfig::from_toml("[emergency]\ndisk_critical_percent = 150\n").unwrap_err();
        assert!(err.to_string().contains("disk_critical_percent"));
    }

    #[test]
    fn test_unknown_on_failure_rejected() {
        assert!(WardenConfig::from_toml("[sequencer]\non_failure = \"retry\"\n").is_err());
        assert!("retry".parse::<OnFailure>().is_err());
        assert_eq!("Continue".parse::<OnFailure>().unwrap(), OnFailure::Continue);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = WardenConfig::load(Some(Path::new("/nonexistent/warden.toml"))).unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[test]
    fn test_rooted_at_moves_owned_paths() {
        let config = WardenConfig::default().rooted_at(Path::new("/tmp/w"));
        assert_eq!(config.paths.backup_root, PathBuf::from("/tmp/w/backups"));
        assert_eq!(config.paths.lock_file, PathBuf::from("/tmp/w/run/warden.lock"));
    }
}
