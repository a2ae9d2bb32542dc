//! Backup and restore of individual files and directories
//!
//! On-disk layout:
//! - single files: `<basename>.<timestamp>.backup`
//! - directories: `<basename>.<timestamp>.tar.gz` (gzip tar, paths relative to the directory)
//! - snapshots: `system-backup-<timestamp>/` with `metadata.json` (see `snapshot`)
//!
//! Every operation returns an explicit `Result`; nothing here panics on a
//! missing source.

pub mod snapshot;

pub use snapshot::{
    create_snapshot, create_system_backup, emergency_rollback, find_latest_snapshot,
    RollbackSummary, Snapshot, SnapshotMetadata, CRITICAL_PATHS, SNAPSHOT_PREFIX,
};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, WardenError};

/// Extension of single-file backups
pub const FILE_SUFFIX: &str = "backup";

/// Extension of directory archives
pub const ARCHIVE_SUFFIX: &str = "tar.gz";

/// Filename fragments that mark a file as sensitive
pub const SENSITIVE_PATTERNS: &[&str] = &["ssh", "key", "token", "secret", "password", "config"];

/// Owner-only file mode for sensitive backups and every archive
pub const SENSITIVE_MODE: u32 = 0o600;

/// Mode for directories warden creates to hold backups
pub const DIR_MODE: u32 = 0o700;

/// What a backup artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    File,
    Directory,
}

/// One backup taken by warden
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub source: PathBuf,
    pub backup: PathBuf,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    pub sensitive: bool,
}

/// Result of a file restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub target: PathBuf,
    /// Copy of the target taken just before it was overwritten
    pub before_restore: Option<PathBuf>,
}

/// An artifact found by `list_backups`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupListing {
    pub name: String,
    pub path: PathBuf,
    pub kind: BackupKind,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// What `cleanup_old_backups` removed
#[derive(Debug, Clone, Default)]
pub struct CleanupSummary {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    /// Directories left empty by the cleanup and removed with it
    pub pruned_dirs: Vec<PathBuf>,
}

/// True when the file name matches a sensitivity pattern (case-insensitive)
pub fn is_sensitive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    SENSITIVE_PATTERNS.iter().any(|p| name.contains(p))
}

/// Create `dir` if needed; an existing directory is fine.
///
/// Directories created here are owner-only.
pub fn create_backup_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    if dir.exists() {
        return Err(WardenError::backup(format!(
            "{} exists and is not a directory",
            dir.display()
        )));
    }

    fs::create_dir_all(dir)
        .map_err(|e| WardenError::backup(format!("cannot create {}: {}", dir.display(), e)))?;
    fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))?;
    debug!("Created backup directory {}", dir.display());
    Ok(())
}

/// `dir/<base>.<ts>.<ext>`, or `dir/<base>.<ts>-N.<ext>` if that already exists
pub(crate) fn unique_artifact_path(dir: &Path, base: &str, ts: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{}.{}.{}", base, ts, ext));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{}.{}-{}.{}", base, ts, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| WardenError::backup(format!("{} has no file name", path.display())))
}

/// Copy `path` into `dir`, keeping permission bits and (when allowed) ownership.
pub fn backup_file(path: &Path, dir: &Path, name: Option<&str>) -> Result<BackupRecord> {
    if !path.exists() {
        return Err(WardenError::backup(format!(
            "source does not exist: {}",
            path.display()
        )));
    }
    if path.is_dir() {
        return Err(WardenError::backup(format!(
            "{} is a directory; use backup_directory",
            path.display()
        )));
    }

    create_backup_dir(dir)?;
    let base = base_name(path)?;
    let dest = match name {
        Some(name) => dir.join(name),
        None => unique_artifact_path(dir, &base, &crate::timestamp(), FILE_SUFFIX),
    };

    fs::copy(path, &dest).map_err(|e| {
        WardenError::backup(format!(
            "copy {} -> {} failed: {}",
            path.display(),
            dest.display(),
            e
        ))
    })?;
    preserve_ownership(path, &dest);

    let sensitive = is_sensitive(path);
    if sensitive {
        fs::set_permissions(&dest, fs::Permissions::from_mode(SENSITIVE_MODE))?;
    }

    info!("Backed up {} to {}", path.display(), dest.display());
    Ok(BackupRecord {
        source: path.to_path_buf(),
        backup: dest,
        created_at: Utc::now(),
        kind: BackupKind::File,
        sensitive,
    })
}

/// Back up content already read from `source` (used when host files are
/// reached through the system collaborator).
pub fn backup_contents(source: &Path, contents: &str, dir: &Path) -> Result<BackupRecord> {
    create_backup_dir(dir)?;
    let base = base_name(source)?;
    let dest = unique_artifact_path(dir, &base, &crate::timestamp(), FILE_SUFFIX);

    fs::write(&dest, contents)
        .map_err(|e| WardenError::backup(format!("write {} failed: {}", dest.display(), e)))?;

    let sensitive = is_sensitive(source);
    let mode = if sensitive { SENSITIVE_MODE } else { 0o644 };
    fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;

    debug!("Saved copy of {} as {}", source.display(), dest.display());
    Ok(BackupRecord {
        source: source.to_path_buf(),
        backup: dest,
        created_at: Utc::now(),
        kind: BackupKind::File,
        sensitive,
    })
}

fn preserve_ownership(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    if let Err(e) = std::os::unix::fs::chown(dest, Some(meta.uid()), Some(meta.gid())) {
        // Unprivileged runs cannot hand files to other owners.
        debug!("Ownership of {} not preserved: {}", dest.display(), e);
    }
}

/// Archive directory `path` into `dir` as a gzip tarball (always owner-only).
pub fn backup_directory(path: &Path, dir: &Path, name: Option<&str>) -> Result<BackupRecord> {
    if !path.is_dir() {
        return Err(WardenError::backup(format!(
            "not a directory: {}",
            path.display()
        )));
    }

    create_backup_dir(dir)?;
    let base = base_name(path)?;
    let dest = match name {
        Some(name) => dir.join(name),
        None => unique_artifact_path(dir, &base, &crate::timestamp(), ARCHIVE_SUFFIX),
    };

    if let Err(e) = write_archive(path, &dest) {
        let _ = fs::remove_file(&dest);
        return Err(WardenError::backup(format!(
            "archive {} failed: {}",
            path.display(),
            e
        )));
    }
    fs::set_permissions(&dest, fs::Permissions::from_mode(SENSITIVE_MODE))?;

    info!("Archived {} to {}", path.display(), dest.display());
    Ok(BackupRecord {
        source: path.to_path_buf(),
        backup: dest,
        created_at: Utc::now(),
        kind: BackupKind::Directory,
        sensitive: true,
    })
}

fn write_archive(source: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Overwrite `target` from `backup`.
///
/// An existing target is first saved next to the backup as
/// `<basename>.before-restore.<timestamp>.backup`, so a restore can be undone.
pub fn restore_file(backup: &Path, target: &Path) -> Result<RestoreOutcome> {
    if !backup.is_file() {
        return Err(WardenError::restore(format!(
            "backup not found: {}",
            backup.display()
        )));
    }

    let before_restore = if target.is_file() {
        let holding = backup.parent().unwrap_or_else(|| Path::new("."));
        let base = format!("{}.before-restore", base_name(target)?);
        let dest = unique_artifact_path(holding, &base, &crate::timestamp(), FILE_SUFFIX);
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(base);
        let record = backup_file(target, holding, Some(&name)).map_err(|e| {
            WardenError::restore(format!(
                "could not save current {} before restoring: {}",
                target.display(),
                e
            ))
        })?;
        Some(record.backup)
    } else {
        None
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(backup, target).map_err(|e| {
        WardenError::restore(format!(
            "copy {} -> {} failed: {}",
            backup.display(),
            target.display(),
            e
        ))
    })?;

    info!("Restored {} from {}", target.display(), backup.display());
    Ok(RestoreOutcome {
        target: target.to_path_buf(),
        before_restore,
    })
}

/// Extract `archive` into `target_dir`.
pub fn restore_directory(archive: &Path, target_dir: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(WardenError::restore(format!(
            "archive not found: {}",
            archive.display()
        )));
    }

    fs::create_dir_all(target_dir)?;
    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.set_preserve_permissions(true);
    tarball.unpack(target_dir).map_err(|e| {
        WardenError::restore(format!(
            "extract {} into {} failed: {}",
            archive.display(),
            target_dir.display(),
            e
        ))
    })?;

    info!("Restored {} from {}", target_dir.display(), archive.display());
    Ok(())
}

fn artifact_kind(name: &str) -> Option<BackupKind> {
    if name.ends_with(&format!(".{}", ARCHIVE_SUFFIX)) {
        Some(BackupKind::Directory)
    } else if name.ends_with(&format!(".{}", FILE_SUFFIX)) {
        Some(BackupKind::File)
    } else {
        None
    }
}

/// Backup artifacts under `dir` (recursively), sorted by name.
///
/// A missing directory yields an empty listing.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupListing>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut listings = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let Some(kind) = artifact_kind(&name) else {
            continue;
        };
        let meta = entry.metadata().map_err(|e| {
            WardenError::backup(format!("stat {}: {}", entry.path().display(), e))
        })?;
        let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());

        listings.push(BackupListing {
            name,
            path: entry.path().to_path_buf(),
            kind,
            size: meta.len(),
            modified,
        });
    }

    listings.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    Ok(listings)
}

/// Delete artifacts older than `retention_days`.
pub fn cleanup_old_backups(dir: &Path, retention_days: u32) -> Result<CleanupSummary> {
    cleanup_old_backups_at(dir, retention_days, SystemTime::now())
}

fn age(now: SystemTime, modified: SystemTime) -> Duration {
    // Future timestamps count as brand new.
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}

/// `cleanup_old_backups` against an explicit clock.
///
/// An artifact is removed only when its age is strictly greater than the
/// retention window; anything at or inside the window is kept. Snapshot
/// directories go as a whole once they and everything in them are expired.
pub fn cleanup_old_backups_at(
    dir: &Path,
    retention_days: u32,
    now: SystemTime,
) -> Result<CleanupSummary> {
    let window = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let mut summary = CleanupSummary::default();

    if !dir.exists() {
        return Ok(summary);
    }

    // Whole snapshots first: removing files inside would bump the directory mtime.
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if !path.is_dir() || !name.starts_with(SNAPSHOT_PREFIX) {
            continue;
        }

        let dir_modified = entry.metadata()?.modified()?;
        let all_expired = list_backups(&path)?.iter().all(|artifact| {
            let modified: SystemTime = artifact.modified.into();
            age(now, modified) > window
        });

        if age(now, dir_modified) > window && all_expired {
            fs::remove_dir_all(&path)?;
            info!("Removed expired snapshot {}", path.display());
            summary.removed.push(path);
        }
    }

    let mut emptied = Vec::new();
    for artifact in list_backups(dir)? {
        let modified: SystemTime = artifact.modified.into();
        if age(now, modified) > window {
            fs::remove_file(&artifact.path)?;
            info!("Removed expired backup {}", artifact.path.display());
            if let Some(parent) = artifact.path.parent() {
                emptied.push(parent.to_path_buf());
            }
            summary.removed.push(artifact.path);
        } else {
            summary.kept += 1;
        }
    }

    // Deepest first so a parent is only tried after its children.
    emptied.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    emptied.dedup();
    for start in emptied {
        let mut current = start;
        while current.as_path() != dir && current.starts_with(dir) {
            let is_empty = fs::read_dir(&current)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty || fs::remove_dir(&current).is_err() {
                break;
            }
            debug!("Removed empty backup directory {}", current.display());
            summary.pruned_dirs.push(current.clone());
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sensitive() {
        assert!(is_sensitive(Path::new("/etc/ssh/sshd_config")));
        assert!(is_sensitive(Path::new("/root/.ssh/authorized_keys")));
        assert!(is_sensitive(Path::new("/etc/app/API_TOKEN")));
        assert!(!is_sensitive(Path::new("/etc/fstab")));
        assert!(!is_sensitive(Path::new("/etc/hosts")));
    }

    #[test]
    fn test_create_backup_dir_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a/b");
        create_backup_dir(&dir).unwrap();
        create_backup_dir(&dir).unwrap();
        assert!(dir.is_dir());
        let mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, DIR_MODE);
    }

    #[test]
    fn test_backup_file_missing_source() {
        let root = tempfile::tempdir().unwrap();
        let err = backup_file(&root.path().join("nope"), root.path(), None).unwrap_err();
        assert!(matches!(err, WardenError::Backup(_)));
    }

    #[test]
    fn test_backup_file_default_name_and_mode() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("sshd_config");
        fs::write(&source, "PermitRootLogin no\n").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o644)).unwrap();

        let record = backup_file(&source, &root.path().join("out"), None).unwrap();
        let name = record.backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("sshd_config."));
        assert!(name.ends_with(".backup"));
        assert!(record.sensitive);
        assert_eq!(record.kind, BackupKind::File);

        let mode = fs::metadata(&record.backup).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SENSITIVE_MODE);
        assert_eq!(fs::read_to_string(&record.backup).unwrap(), "PermitRootLogin no\n");
    }

    #[test]
    fn test_backup_file_keeps_mode_when_not_sensitive() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("fstab");
        fs::write(&source, "proc /proc proc defaults 0 0\n").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o644)).unwrap();

        let record = backup_file(&source, root.path(), Some("fstab.copy")).unwrap();
        assert_eq!(record.backup, root.path().join("fstab.copy"));
        let mode = fs::metadata(&record.backup).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_backups_in_same_second_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("hosts");
        fs::write(&source, "127.0.0.1 localhost\n").unwrap();
        let out = root.path().join("out");

        let first = backup_file(&source, &out, None).unwrap();
        let second = backup_file(&source, &out, None).unwrap();
        assert_ne!(first.backup, second.backup);
    }

    #[test]
    fn test_directory_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("rules.d");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("10-base.rules"), "-w /etc/passwd -p wa\n").unwrap();
        fs::write(source.join("nested/inner.rules"), "-w /etc/shadow -p wa\n").unwrap();

        let record = backup_directory(&source, &root.path().join("out"), None).unwrap();
        assert!(record.backup.to_string_lossy().ends_with(".tar.gz"));
        let mode = fs::metadata(&record.backup).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SENSITIVE_MODE);

        let target = root.path().join("restored");
        restore_directory(&record.backup, &target).unwrap();
        assert_eq!(
            fs::read_to_string(target.join("nested/inner.rules")).unwrap(),
            "-w /etc/shadow -p wa\n"
        );
    }

    #[test]
    fn test_backup_directory_rejects_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(backup_directory(&file, root.path(), None).is_err());
    }

    #[test]
    fn test_restore_missing_backup() {
        let root = tempfile::tempdir().unwrap();
        let err = restore_file(&root.path().join("gone.backup"), &root.path().join("t")).unwrap_err();
        assert!(matches!(err, WardenError::Restore(_)));
        assert!(restore_directory(&root.path().join("gone.tar.gz"), root.path()).is_err());
    }

    #[test]
    fn test_restore_without_existing_target() {
        let root = tempfile::tempdir().unwrap();
        let backup = root.path().join("limits.conf.backup");
        fs::write(&backup, "* hard core 0\n").unwrap();
        let target = root.path().join("etc/security/limits.conf");

        let outcome = restore_file(&backup, &target).unwrap();
        assert_eq!(outcome.before_restore, None);
        assert_eq!(fs::read_to_string(&target).unwrap(), "* hard core 0\n");
    }

    #[test]
    fn test_list_backups_sorted_and_filtered() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("b.20240102_000000.backup"), "b").unwrap();
        fs::write(root.path().join("a.20240101_000000.tar.gz"), "a").unwrap();
        fs::write(root.path().join("notes.txt"), "ignored").unwrap();

        let listing = list_backups(root.path()).unwrap();
        let names: Vec<&str> = listing.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a.20240101_000000.tar.gz", "b.20240102_000000.backup"]);
        assert_eq!(listing[0].kind, BackupKind::Directory);
        assert_eq!(listing[1].size, 1);
    }

    #[test]
    fn test_list_backups_missing_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(list_backups(&root.path().join("none")).unwrap().is_empty());
    }
}
