//! Phases that own a single configuration file

use std::path::{Path, PathBuf};

use super::{ensure_service, safety_copy};
use crate::sequencer::{Phase, PhaseContext, PhaseOutcome};
use crate::system::{ssh_service_name, ServiceAction};

/// Applied after the file changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    Run(&'static str, Vec<String>),
    Restart(String),
    ReloadSsh,
}

/// Desired contents for one file, plus how to check and apply them.
///
/// Unchanged file: services are ensured and nothing else happens.
/// Changed file: safety copy, write, validate (the old file comes back if
/// validation fails), post actions, services.
pub struct ConfigFilePhase {
    id: &'static str,
    ordinal: u32,
    description: &'static str,
    path: PathBuf,
    contents: String,
    mode: u32,
    validate: Option<(&'static str, Vec<String>)>,
    post: Vec<PostAction>,
    services: Vec<String>,
    depends_on: &'static [&'static str],
}

impl ConfigFilePhase {
    pub fn new(
        id: &'static str,
        ordinal: u32,
        description: &'static str,
        path: impl Into<PathBuf>,
        contents: impl Into<String>,
    ) -> Self {
        Self {
            id,
            ordinal,
            description,
            path: path.into(),
            contents: contents.into(),
            mode: 0o644,
            validate: None,
            post: Vec::new(),
            services: Vec::new(),
            depends_on: &[],
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate_with(mut self, program: &'static str, args: &[&str]) -> Self {
        self.validate = Some((program, args.iter().map(|a| a.to_string()).collect()));
        self
    }

    pub fn then(mut self, action: PostAction) -> Self {
        self.post.push(action);
        self
    }

    pub fn service(mut self, name: &str) -> Self {
        self.services.push(name.to_string());
        self
    }

    pub fn depends_on(mut self, phases: &'static [&'static str]) -> Self {
        self.depends_on = phases;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    fn ensure_services(&self, ctx: &PhaseContext) -> Result<usize, String> {
        let mut changed = 0;
        for service in &self.services {
            if ensure_service(ctx, service)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Put the previous state back after a rejected write.
    fn revert(&self, ctx: &PhaseContext, previous: Option<&str>) {
        let reverted = match previous {
            Some(old) => ctx.system.write_file(&self.path, old, self.mode),
            None => ctx.system.remove_file(&self.path),
        };
        match reverted {
            Ok(()) => ctx
                .log
                .warning(format!("Reverted {}", self.path.display())),
            Err(e) => ctx.log.error(format!(
                "Could not revert {}: {}; restore it from {}",
                self.path.display(),
                e,
                ctx.backup_dir.display()
            )),
        }
    }

    fn post_action(&self, ctx: &PhaseContext, action: &PostAction) -> Result<(), String> {
        let timeout = ctx.config.timeouts.command();
        let (label, out) = match action {
            PostAction::Run(program, args) => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                (
                    format!("{} {}", program, args.join(" ")),
                    ctx.system.run(program, &args, timeout),
                )
            }
            PostAction::Restart(service) => (
                format!("restart {}", service),
                ctx.system.service_action(service, ServiceAction::Restart),
            ),
            PostAction::ReloadSsh => {
                let unit = ssh_service_name(ctx.system);
                (
                    format!("reload {}", unit),
                    ctx.system.service_action(unit, ServiceAction::Reload),
                )
            }
        };
        if out.success() {
            ctx.log.debug(format!("{}: ok", label));
            Ok(())
        } else {
            Err(format!("{}: {}", label, out.reason()))
        }
    }
}

impl Phase for ConfigFilePhase {
    fn id(&self) -> &str {
        self.id
    }

    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn description(&self) -> &str {
        self.description
    }

    fn depends_on(&self) -> &[&'static str] {
        self.depends_on
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome {
        let previous = ctx.system.read_file(&self.path).ok();

        if previous.as_deref() == Some(self.contents.as_str()) {
            return match self.ensure_services(ctx) {
                Ok(0) => PhaseOutcome::Completed(format!(
                    "{} already up to date",
                    self.path.display()
                )),
                Ok(n) => PhaseOutcome::Completed(format!(
                    "{} up to date, {} service(s) started",
                    self.path.display(),
                    n
                )),
                Err(e) => PhaseOutcome::Failed(e),
            };
        }

        // No safety net, no mutation
        if let Err(e) = safety_copy(ctx, &self.path) {
            return PhaseOutcome::Failed(format!("backup failed, file left untouched: {}", e));
        }

        if let Some(parent) = self.path.parent() {
            if !ctx.system.path_exists(parent) {
                let dir = parent.to_string_lossy().to_string();
                let out = ctx
                    .system
                    .run("mkdir", &["-p", dir.as_str()], ctx.config.timeouts.command());
                if !out.success() {
                    return PhaseOutcome::Failed(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        out.reason()
                    ));
                }
            }
        }

        if let Err(e) = ctx.system.write_file(&self.path, &self.contents, self.mode) {
            return PhaseOutcome::Failed(format!("cannot write {}: {}", self.path.display(), e));
        }
        ctx.log.info(format!("Wrote {}", self.path.display()));

        if let Some((program, args)) = &self.validate {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let out = ctx
                .system
                .run(program, &args, ctx.config.timeouts.command());
            // 127: validator not installed, nothing to check against
            if !out.success() && out.exit_code != 127 {
                self.revert(ctx, previous.as_deref());
                return PhaseOutcome::Failed(format!(
                    "{} rejected the new configuration: {}",
                    program,
                    out.reason()
                ));
            }
        }

        for action in &self.post {
            if let Err(e) = self.post_action(ctx, action) {
                return PhaseOutcome::Failed(e);
            }
        }

        match self.ensure_services(ctx) {
            Ok(_) => PhaseOutcome::Completed(format!("{} updated", self.path.display())),
            Err(e) => PhaseOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;
    use crate::logging::StatusLog;
    use crate::phases::testing::context;
    use crate::phases::{fail2ban, ssh_hardening, SSH_HARDENING_DROPIN};
    use crate::system::{CommandOutput, FakeSystem, ServiceState};

    #[test]
    fn test_second_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy()
            .with_service("fail2ban", ServiceState::Inactive);
        let ctx = context(&system, &log, &config);
        let phase = fail2ban(22);

        assert!(matches!(phase.run(&ctx), PhaseOutcome::Completed(_)));
        assert!(system.is_enabled("fail2ban"));
        assert_eq!(system.service_state("fail2ban"), Some(ServiceState::Active));

        system.clear_commands();
        let second = phase.run(&ctx);
        assert_eq!(
            second,
            PhaseOutcome::Completed("/etc/fail2ban/jail.local already up to date".to_string())
        );
        assert!(system.commands_starting_with("systemctl enable").is_empty());
        assert!(system.commands_starting_with("systemctl restart").is_empty());
        assert!(system.commands_starting_with("fail2ban-client").is_empty());
    }

    #[test]
    fn test_existing_file_is_backed_up_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy()
            .with_file(SSH_HARDENING_DROPIN, "Port 22\n");
        let ctx = context(&system, &log, &config);

        let outcome = ssh_hardening(22, false).run(&ctx);
        assert!(matches!(outcome, PhaseOutcome::Completed(_)), "{:?}", outcome);

        let saved: Vec<_> = std::fs::read_dir(&ctx.backup_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(saved.len(), 1);
        assert_eq!(std::fs::read_to_string(&saved[0]).unwrap(), "Port 22\n");
        assert_eq!(system.commands_starting_with("systemctl reload ssh").len(), 1);
    }

    #[test]
    fn test_rejected_config_is_reverted() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy()
            .with_file(SSH_HARDENING_DROPIN, "Port 22\n")
            .with_response("sshd -t", CommandOutput::failed(255, "Unsupported option Foo"));
        let ctx = context(&system, &log, &config);

        let outcome = ssh_hardening(22, false).run(&ctx);
        assert!(matches!(outcome, PhaseOutcome::Failed(ref m) if m.contains("Unsupported option")));
        assert_eq!(system.file(SSH_HARDENING_DROPIN).as_deref(), Some("Port 22\n"));
        assert!(system.commands_starting_with("systemctl reload").is_empty());
    }

    #[test]
    fn test_rejected_new_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardenConfig::default().rooted_at(dir.path());
        let log = StatusLog::memory("warden");
        let system = FakeSystem::healthy()
            .with_response("sshd -t", CommandOutput::failed(255, "bad"));
        let ctx = context(&system, &log, &config);

        let outcome = ssh_hardening(22, false).run(&ctx);
        assert!(matches!(outcome, PhaseOutcome::Failed(_)));
        assert_eq!(system.file(SSH_HARDENING_DROPIN), None);
    }
}
