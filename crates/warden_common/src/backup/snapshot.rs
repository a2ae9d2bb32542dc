//! System snapshots and emergency rollback
//!
//! A snapshot is `system-backup-<timestamp>/` under the backup root holding
//! one artifact per critical path plus `metadata.json`. Rollback restores
//! the most recently modified snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{
    backup_directory, backup_file, create_backup_dir, restore_directory, restore_file,
    BackupKind, BackupRecord, DIR_MODE, FILE_SUFFIX,
};
use crate::error::{Result, WardenError};
use crate::logging::StatusLog;
use crate::prompt::OperatorPrompt;
use crate::system::{ssh_service_name, ServiceAction, SystemCollaborator, SERVICE_TIMEOUT};

/// Directory name prefix of every snapshot
pub const SNAPSHOT_PREFIX: &str = "system-backup-";

/// Metadata file inside a snapshot
pub const METADATA_FILE: &str = "metadata.json";

/// Paths captured by `create_system_backup`
pub const CRITICAL_PATHS: &[&str] = &[
    "/etc/ssh/sshd_config",
    "/etc/ssh/sshd_config.d",
    "/etc/network/interfaces",
    "/etc/netplan",
    "/etc/fstab",
    "/etc/hosts",
    "/etc/sysctl.conf",
    "/etc/sysctl.d",
    "/etc/security/limits.conf",
    "/etc/systemd/resolved.conf",
    "/etc/ufw/user.rules",
    "/etc/ufw/user6.rules",
    "/etc/audit/rules.d",
    "/etc/fail2ban/jail.local",
    "/etc/apt/apt.conf.d/20auto-upgrades",
];

/// Targets rollback knows by name when a snapshot has no usable metadata
const KNOWN_TARGETS: &[(&str, &str)] = &[
    ("sshd_config", "/etc/ssh/sshd_config"),
    ("user.rules", "/etc/ufw/user.rules"),
    ("user6.rules", "/etc/ufw/user6.rules"),
    ("sysctl.conf", "/etc/sysctl.conf"),
    ("limits.conf", "/etc/security/limits.conf"),
    ("resolved.conf", "/etc/systemd/resolved.conf"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub hostname: String,
    pub os_version: String,
    pub kernel_version: String,
    pub script_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<BackupRecord>,
}

/// A snapshot on disk
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dir: PathBuf,
    pub metadata: SnapshotMetadata,
    /// Sources that existed but could not be captured
    pub failed: Vec<PathBuf>,
}

/// What `emergency_rollback` did
#[derive(Debug, Clone, Default)]
pub struct RollbackSummary {
    pub snapshot: PathBuf,
    pub restored: Vec<PathBuf>,
    pub reloaded: Vec<String>,
    pub failed: Vec<String>,
}

impl RollbackSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

fn snapshot_dir(backup_root: &Path) -> PathBuf {
    let base = backup_root.join(format!("{}{}", SNAPSHOT_PREFIX, crate::timestamp()));
    if !base.exists() {
        return base;
    }
    let name = base.to_string_lossy().to_string();
    (1..)
        .map(|n| PathBuf::from(format!("{}-{}", name, n)))
        .find(|p| !p.exists())
        .unwrap_or(base)
}

/// Capture `sources` into a new snapshot under `backup_root`.
///
/// Missing sources are skipped; sources that exist but fail to copy are
/// logged at ERROR and listed in `Snapshot::failed`.
pub fn create_snapshot(
    system: &dyn SystemCollaborator,
    backup_root: &Path,
    sources: &[PathBuf],
    log: &StatusLog,
) -> Result<Snapshot> {
    create_backup_dir(backup_root)?;
    let dir = snapshot_dir(backup_root);
    fs::create_dir_all(&dir)?;
    fs::set_permissions(&dir, fs::Permissions::from_mode(DIR_MODE))?;
    log.info(format!("Creating system snapshot in {}", dir.display()));

    let mut records = Vec::new();
    let mut failed = Vec::new();
    for source in sources {
        let result = if source.is_dir() {
            backup_directory(source, &dir, None)
        } else if source.is_file() {
            backup_file(source, &dir, None)
        } else {
            log.debug(format!("Not present, skipped: {}", source.display()));
            continue;
        };

        match result {
            Ok(record) => {
                log.debug(format!("Captured {}", source.display()));
                records.push(record);
            }
            Err(e) => {
                log.error(format!("Snapshot of {} failed: {}", source.display(), e));
                failed.push(source.clone());
            }
        }
    }

    let metadata = SnapshotMetadata {
        hostname: system.hostname(),
        os_version: system
            .os_release()
            .map(|os| os.pretty_name)
            .unwrap_or_else(|| "unknown".to_string()),
        kernel_version: system.kernel_version(),
        script_version: crate::VERSION.to_string(),
        created_at: Utc::now(),
        records,
    };
    let json = serde_json::to_string_pretty(&metadata)?;
    fs::write(dir.join(METADATA_FILE), json)?;

    log.success(format!(
        "Snapshot {} holds {} item(s)",
        dir.display(),
        metadata.records.len()
    ));
    Ok(Snapshot {
        dir,
        metadata,
        failed,
    })
}

/// Snapshot the fixed allowlist of critical system paths.
pub fn create_system_backup(
    system: &dyn SystemCollaborator,
    backup_root: &Path,
    log: &StatusLog,
) -> Result<Snapshot> {
    let sources: Vec<PathBuf> = CRITICAL_PATHS.iter().map(PathBuf::from).collect();
    create_snapshot(system, backup_root, &sources, log)
}

/// Most recently modified snapshot directory under `backup_root`
pub fn find_latest_snapshot(backup_root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(backup_root).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(SNAPSHOT_PREFIX))
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((modified, e.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

/// Records to restore: the snapshot metadata, or name-based matching of
/// artifacts against known targets when metadata is missing.
fn rollback_records(dir: &Path, log: &StatusLog) -> Vec<BackupRecord> {
    let metadata = fs::read_to_string(dir.join(METADATA_FILE))
        .ok()
        .and_then(|json| serde_json::from_str::<SnapshotMetadata>(&json).ok());
    if let Some(metadata) = metadata {
        return metadata.records;
    }

    log.warning(format!(
        "No readable {} in {}; restoring known files by name",
        METADATA_FILE,
        dir.display()
    ));
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut records: Vec<BackupRecord> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let original = original_name(&name)?;
            let target = KNOWN_TARGETS
                .iter()
                .find(|(known, _)| *known == original)
                .map(|(_, target)| PathBuf::from(target))?;
            let created_at = e
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            Some(BackupRecord {
                source: target,
                backup: e.path(),
                created_at,
                kind: BackupKind::File,
                sensitive: super::is_sensitive(Path::new(&original)),
            })
        })
        .collect();
    records.sort_by(|a, b| a.source.cmp(&b.source));
    records
}

/// `sshd_config.20240101_120000.backup` -> `sshd_config`
fn original_name(artifact: &str) -> Option<String> {
    let stem = artifact.strip_suffix(&format!(".{}", FILE_SUFFIX))?;
    let (original, _timestamp) = stem.rsplit_once('.')?;
    Some(original.to_string())
}

/// Follow-up needed after a recognized file is put back
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reload {
    RestartSsh,
    UfwReload,
    SysctlLoad,
    RestartResolved,
}

impl Reload {
    fn for_target(target: &Path) -> Option<Reload> {
        let name = target.file_name()?.to_string_lossy().to_string();
        match name.as_str() {
            "sshd_config" => Some(Reload::RestartSsh),
            "user.rules" | "user6.rules" => Some(Reload::UfwReload),
            "sysctl.conf" => Some(Reload::SysctlLoad),
            "resolved.conf" => Some(Reload::RestartResolved),
            // limits.conf applies to new sessions; nothing to reload
            _ => None,
        }
    }

    fn apply(&self, system: &dyn SystemCollaborator) -> (String, bool) {
        match self {
            Reload::RestartSsh => {
                let unit = ssh_service_name(system);
                let out = system.service_action(unit, ServiceAction::Restart);
                (format!("restart {}", unit), out.success())
            }
            Reload::UfwReload => {
                let out = system.run("ufw", &["reload"], SERVICE_TIMEOUT);
                ("ufw reload".to_string(), out.success())
            }
            Reload::SysctlLoad => {
                let out = system.run("sysctl", &["-p"], SERVICE_TIMEOUT);
                ("sysctl -p".to_string(), out.success())
            }
            Reload::RestartResolved => {
                let out = system.service_action("systemd-resolved", ServiceAction::Restart);
                ("restart systemd-resolved".to_string(), out.success())
            }
        }
    }
}

/// Restore the most recent snapshot after operator confirmation.
///
/// With no snapshot the call fails with `NoSnapshot` before touching
/// anything; a declined confirmation fails with `Cancelled`.
pub fn emergency_rollback(
    system: &dyn SystemCollaborator,
    backup_root: &Path,
    prompt: &dyn OperatorPrompt,
    log: &StatusLog,
) -> Result<RollbackSummary> {
    let Some(dir) = find_latest_snapshot(backup_root) else {
        log.error(format!(
            "No {}* snapshot under {}; nothing to roll back",
            SNAPSHOT_PREFIX,
            backup_root.display()
        ));
        return Err(WardenError::NoSnapshot(backup_root.display().to_string()));
    };

    let records = rollback_records(&dir, log);
    log.info(format!(
        "Latest snapshot: {} ({} item(s))",
        dir.display(),
        records.len()
    ));

    let question = format!(
        "Restore {} item(s) from {}? This overwrites current configuration",
        records.len(),
        dir.display()
    );
    if !prompt.confirm(&question) {
        log.warning("Rollback declined by operator; nothing changed");
        return Err(WardenError::Cancelled("emergency rollback".to_string()));
    }

    let mut summary = RollbackSummary {
        snapshot: dir.clone(),
        ..Default::default()
    };
    let mut reloads: Vec<Reload> = Vec::new();

    for record in &records {
        let result = match record.kind {
            BackupKind::File => restore_file(&record.backup, &record.source).map(|_| ()),
            BackupKind::Directory => restore_directory(&record.backup, &record.source),
        };
        match result {
            Ok(()) => {
                log.success(format!("Restored {}", record.source.display()));
                summary.restored.push(record.source.clone());
                if let Some(reload) = Reload::for_target(&record.source) {
                    if !reloads.contains(&reload) {
                        reloads.push(reload);
                    }
                }
            }
            Err(e) => {
                log.error(format!("Restore of {} failed: {}", record.source.display(), e));
                summary.failed.push(record.source.display().to_string());
            }
        }
    }

    for reload in &reloads {
        let (label, ok) = reload.apply(system);
        if ok {
            log.success(format!("Applied: {}", label));
            summary.reloaded.push(label);
        } else {
            log.error(format!("Reload step failed: {}", label));
            summary.failed.push(label);
        }
    }

    if summary.success() {
        log.success(format!("Rollback from {} complete", dir.display()));
    } else {
        log.error(format!(
            "Rollback incomplete ({} failure(s)); run diagnostics now",
            summary.failed.len()
        ));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::FakeSystem;

    #[test]
    fn test_original_name() {
        assert_eq!(
            original_name("resolved.conf.20240101_120000.backup").as_deref(),
            Some("resolved.conf")
        );
        assert_eq!(
            original_name("sshd_config.20240101_120000-2.backup").as_deref(),
            Some("sshd_config")
        );
        assert_eq!(original_name("rules.d.20240101_120000.tar.gz"), None);
    }

    #[test]
    fn test_reload_dispatch_by_name() {
        assert_eq!(
            Reload::for_target(Path::new("/etc/ssh/sshd_config")),
            Some(Reload::RestartSsh)
        );
        assert_eq!(
            Reload::for_target(Path::new("/etc/ufw/user6.rules")),
            Some(Reload::UfwReload)
        );
        assert_eq!(Reload::for_target(Path::new("/etc/security/limits.conf")), None);
        assert_eq!(Reload::for_target(Path::new("/etc/hosts")), None);
    }

    #[test]
    fn test_snapshot_records_metadata() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("hosts");
        fs::write(&source, "127.0.0.1 localhost\n").unwrap();
        let system = FakeSystem::healthy();
        let log = StatusLog::memory("backup");

        let snapshot = create_snapshot(
            &system,
            &root.path().join("backups"),
            &[source.clone(), root.path().join("absent")],
            &log,
        )
        .unwrap();

        assert!(snapshot
            .dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SNAPSHOT_PREFIX));
        assert_eq!(snapshot.metadata.records.len(), 1);
        assert_eq!(snapshot.metadata.hostname, "testhost");
        assert!(snapshot.failed.is_empty());

        let json = fs::read_to_string(snapshot.dir.join(METADATA_FILE)).unwrap();
        let parsed: SnapshotMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.records[0].source, source);
    }

    #[test]
    fn test_find_latest_snapshot_ignores_other_dirs() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(find_latest_snapshot(root.path()), None);

        fs::create_dir(root.path().join("unrelated")).unwrap();
        fs::create_dir(root.path().join("system-backup-20240101_000000")).unwrap();
        assert_eq!(
            find_latest_snapshot(root.path()),
            Some(root.path().join("system-backup-20240101_000000"))
        );
    }
}
