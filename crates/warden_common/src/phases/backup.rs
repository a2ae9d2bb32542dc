//! First phase: snapshot the critical system paths

use std::fs;

use crate::backup::snapshot::METADATA_FILE;
use crate::backup::{create_snapshot, find_latest_snapshot, SnapshotMetadata};
use crate::sequencer::{Phase, PhaseContext, PhaseOutcome};

pub struct SystemBackupPhase;

impl SystemBackupPhase {
    /// Snapshot taken since this run started, read back from disk
    fn current_snapshot(&self, ctx: &PhaseContext) -> Option<String> {
        let dir = find_latest_snapshot(&ctx.config.paths.backup_root)?;
        let json = fs::read_to_string(dir.join(METADATA_FILE)).ok()?;
        let metadata: SnapshotMetadata = serde_json::from_str(&json).ok()?;
        (metadata.created_at >= ctx.run_started)
            .then(|| dir.file_name().map(|n| n.to_string_lossy().to_string()))
            .flatten()
    }
}

impl Phase for SystemBackupPhase {
    fn id(&self) -> &str {
        "system-backup"
    }

    fn ordinal(&self) -> u32 {
        10
    }

    fn description(&self) -> &str {
        "Snapshot critical configuration before any change"
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome {
        if let Some(name) = self.current_snapshot(ctx) {
            return PhaseOutcome::Completed(format!("snapshot {} already taken this run", name));
        }

        let root = &ctx.config.paths.backup_root;
        match create_snapshot(ctx.system, root, &ctx.config.backup.snapshot_paths, ctx.log) {
            Ok(snapshot) if snapshot.failed.is_empty() => PhaseOutcome::Completed(format!(
                "{} item(s) in {}",
                snapshot.metadata.records.len(),
                snapshot.dir.display()
            )),
            Ok(snapshot) => PhaseOutcome::Failed(format!(
                "snapshot {} is incomplete, not captured: {}",
                snapshot.dir.display(),
                snapshot
                    .failed
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Err(e) => PhaseOutcome::Failed(format!("snapshot failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;
    use crate::logging::StatusLog;
    use crate::phases::testing::context;
    use crate::system::FakeSystem;

    #[test]
    fn test_one_snapshot_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        fs::create_dir_all(etc.join("ssh")).unwrap();
        fs::write(etc.join("ssh/sshd_config"), "Port 22\n").unwrap();
        fs::write(etc.join("fstab"), "/dev/sda1 / ext4 defaults 0 1\n").unwrap();

        let mut config = WardenConfig::default().rooted_at(dir.path());
        config.backup.snapshot_paths = vec![etc.join("ssh"), etc.join("fstab"), etc.join("absent")];
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy();
        let ctx = context(&system, &log, &config);

        let first = SystemBackupPhase.run(&ctx);
        assert!(matches!(first, PhaseOutcome::Completed(ref m) if m.starts_with("2 item(s)")), "{:?}", first);
        let second = SystemBackupPhase.run(&ctx);
        assert!(matches!(second, PhaseOutcome::Completed(ref m) if m.contains("already taken")));

        let snapshots = fs::read_dir(&config.paths.backup_root)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("system-backup-")
            })
            .count();
        assert_eq!(snapshots, 1);
    }
}
