//! Built-in hardening phases
//!
//! Each phase checks the target state first and only mutates the host when
//! it differs, so a whole sequence can be re-run safely.

mod backup;
mod config_file;
mod firewall;
mod packages;
mod scan;

pub use backup::SystemBackupPhase;
pub use config_file::{ConfigFilePhase, PostAction};
pub use firewall::FirewallPhase;
pub use packages::{BasePackagesPhase, SystemUpdatePhase};
pub use scan::SecurityScanPhase;

use std::path::{Path, PathBuf};

use crate::backup::backup_contents;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::sequencer::{PhaseContext, PhaseRegistry, ValidationPhase};
use crate::system::ServiceAction;

pub const SSH_HARDENING_DROPIN: &str = "/etc/ssh/sshd_config.d/50-warden-hardening.conf";
pub const FAIL2BAN_JAIL: &str = "/etc/fail2ban/jail.local";
pub const SYSCTL_DROPIN: &str = "/etc/sysctl.d/99-warden-hardening.conf";
pub const AUDIT_RULES: &str = "/etc/audit/rules.d/warden.rules";
pub const AUTO_UPGRADES: &str = "/etc/apt/apt.conf.d/20auto-upgrades";

/// The default sequence, ordinals 10 to 110.
pub fn default_registry(config: &WardenConfig) -> Result<PhaseRegistry> {
    let hardening = &config.hardening;
    PhaseRegistry::new()
        .with(Box::new(SystemBackupPhase))?
        .with(Box::new(SystemUpdatePhase))?
        .with(Box::new(BasePackagesPhase::new(
            hardening.base_packages.clone(),
        )))?
        .with(Box::new(ssh_hardening(
            hardening.ssh_port,
            hardening.disable_password_auth,
        )))?
        .with(Box::new(FirewallPhase::new(
            hardening.ssh_port,
            hardening.firewall_allow.clone(),
        )))?
        .with(Box::new(fail2ban(hardening.ssh_port)))?
        .with(Box::new(kernel_hardening()))?
        .with(Box::new(audit_rules()))?
        .with(Box::new(automatic_updates()))?
        .with(Box::new(SecurityScanPhase::new(hardening.scan_mode)))?
        .with(Box::new(ValidationPhase))
}

pub fn ssh_hardening(port: u16, disable_password_auth: bool) -> ConfigFilePhase {
    let contents = format!(
        "# Managed by warden\n\
         Port {}\n\
         PermitRootLogin prohibit-password\n\
         PasswordAuthentication {}\n\
         PubkeyAuthentication yes\n\
         PermitEmptyPasswords no\n\
         MaxAuthTries 3\n\
         LoginGraceTime 30\n\
         X11Forwarding no\n\
         ClientAliveInterval 300\n\
         ClientAliveCountMax 2\n",
        port,
        if disable_password_auth { "no" } else { "yes" }
    );
    ConfigFilePhase::new(
        "ssh-hardening",
        40,
        "Harden the SSH daemon",
        SSH_HARDENING_DROPIN,
        contents,
    )
    .mode(0o644)
    .validate_with("sshd", &["-t"])
    .then(PostAction::ReloadSsh)
    .depends_on(&["base-packages"])
}

pub fn fail2ban(ssh_port: u16) -> ConfigFilePhase {
    let contents = format!(
        "# Managed by warden\n\
         [DEFAULT]\n\
         bantime = 1h\n\
         findtime = 10m\n\
         maxretry = 5\n\
         backend = systemd\n\
         \n\
         [sshd]\n\
         enabled = true\n\
         port = {}\n",
        ssh_port
    );
    ConfigFilePhase::new(
        "fail2ban",
        60,
        "Ban repeated failed logins",
        FAIL2BAN_JAIL,
        contents,
    )
    .validate_with("fail2ban-client", &["-t"])
    .then(PostAction::Restart("fail2ban".to_string()))
    .service("fail2ban")
    .depends_on(&["base-packages"])
}

pub fn kernel_hardening() -> ConfigFilePhase {
    let contents = "# Managed by warden\n\
        net.ipv4.ip_forward = 0\n\
        net.ipv4.tcp_syncookies = 1\n\
        net.ipv4.conf.all.accept_redirects = 0\n\
        net.ipv4.conf.all.send_redirects = 0\n\
        net.ipv4.conf.all.accept_source_route = 0\n\
        net.ipv4.conf.all.rp_filter = 1\n\
        net.ipv4.conf.all.log_martians = 1\n\
        net.ipv4.icmp_echo_ignore_broadcasts = 1\n\
        net.ipv6.conf.all.accept_redirects = 0\n\
        kernel.randomize_va_space = 2\n\
        kernel.kptr_restrict = 2\n\
        kernel.dmesg_restrict = 1\n\
        fs.suid_dumpable = 0\n";
    ConfigFilePhase::new(
        "kernel-hardening",
        70,
        "Apply hardened sysctl settings",
        SYSCTL_DROPIN,
        contents,
    )
    .then(PostAction::Run("sysctl", vec!["--system".to_string()]))
}

pub fn audit_rules() -> ConfigFilePhase {
    let contents = "## Managed by warden\n\
        -w /etc/passwd -p wa -k identity\n\
        -w /etc/group -p wa -k identity\n\
        -w /etc/shadow -p wa -k identity\n\
        -w /etc/sudoers -p wa -k privilege\n\
        -w /etc/sudoers.d/ -p wa -k privilege\n\
        -w /etc/ssh/sshd_config -p wa -k sshd\n\
        -w /var/log/auth.log -p wa -k auth\n\
        -a always,exit -F arch=b64 -S execve -F euid=0 -k root-commands\n";
    ConfigFilePhase::new(
        "audit-rules",
        80,
        "Install audit rules",
        AUDIT_RULES,
        contents,
    )
    .mode(0o640)
    .then(PostAction::Run("augenrules", vec!["--load".to_string()]))
    .service("auditd")
    .depends_on(&["base-packages"])
}

pub fn automatic_updates() -> ConfigFilePhase {
    let contents = "APT::Periodic::Update-Package-Lists \"1\";\n\
        APT::Periodic::Unattended-Upgrade \"1\";\n\
        APT::Periodic::AutocleanInterval \"7\";\n";
    ConfigFilePhase::new(
        "automatic-updates",
        90,
        "Enable unattended security upgrades",
        AUTO_UPGRADES,
        contents,
    )
    .service("unattended-upgrades")
    .depends_on(&["base-packages"])
}

/// Save the current contents of a host file into the run's backup dir.
///
/// `Ok(None)` when the file does not exist yet.
pub(crate) fn safety_copy(ctx: &PhaseContext, path: &Path) -> std::result::Result<Option<PathBuf>, String> {
    if !ctx.system.path_exists(path) {
        return Ok(None);
    }
    let contents = ctx
        .system
        .read_file(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let record = backup_contents(path, &contents, &ctx.backup_dir)
        .map_err(|e| format!("cannot back up {}: {}", path.display(), e))?;
    ctx.log.debug(format!(
        "Saved {} to {}",
        path.display(),
        record.backup.display()
    ));
    Ok(Some(record.backup))
}

/// Make sure `service` is enabled and running. Returns whether anything changed.
pub(crate) fn ensure_service(ctx: &PhaseContext, service: &str) -> std::result::Result<bool, String> {
    let timeout = ctx.config.timeouts.command();
    let enabled = ctx
        .system
        .run("systemctl", &["is-enabled", "--quiet", service], timeout)
        .success();

    if !enabled {
        let out = ctx
            .system
            .run("systemctl", &["enable", "--now", service], timeout);
        if !out.success() {
            return Err(format!("cannot enable {}: {}", service, out.reason()));
        }
        ctx.log.info(format!("Enabled {}", service));
    } else if !ctx.system.service_active(service) {
        let out = ctx.system.service_action(service, ServiceAction::Start);
        if !out.success() {
            return Err(format!("cannot start {}: {}", service, out.reason()));
        }
        ctx.log.info(format!("Started {}", service));
    } else {
        return Ok(false);
    }

    if ctx.system.service_active(service) {
        Ok(true)
    } else {
        Err(format!("{} is not running after start", service))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;

    use crate::config::WardenConfig;
    use crate::logging::StatusLog;
    use crate::sequencer::PhaseContext;
    use crate::system::SystemCollaborator;

    pub fn context<'a>(
        system: &'a dyn SystemCollaborator,
        log: &'a StatusLog,
        config: &'a WardenConfig,
    ) -> PhaseContext<'a> {
        PhaseContext {
            system,
            log,
            config,
            backup_dir: config.paths.backup_root.join("run"),
            run_started: Utc::now(),
        }
    }
}
