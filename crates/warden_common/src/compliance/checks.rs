//! Control checks shared by the frameworks
//!
//! Each check reads live state through the collaborator and classifies it.
//! Unreadable inputs yield N/A rather than a guess.

use std::path::Path;
use std::time::Duration;

use super::{Classification, Verdict};
use crate::parsers::{
    count_broad_sudo_grants, count_listening_ports, empty_password_accounts, login_defs_value,
    parse_sshd_option, parse_ufw_status, uid_zero_accounts,
};
use crate::system::{ssh_service_name, SystemCollaborator};

use Classification::{Fail, NotApplicable, Pass, Warn};

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Broad sudo grants at or above this count are flagged
pub const SUDO_GRANT_LIMIT: usize = 5;

/// Listening sockets at or above this count are flagged
pub const LISTENING_PORT_LIMIT: usize = 20;

/// Longest acceptable password lifetime in days
pub const PASS_MAX_DAYS_LIMIT: u32 = 365;

fn read(system: &dyn SystemCollaborator, path: &str) -> Option<String> {
    system.read_file(Path::new(path)).ok()
}

fn proc_flag(system: &dyn SystemCollaborator, path: &str) -> Option<String> {
    read(system, path).map(|v| v.trim().to_string())
}

/// Effective sshd value: `sshd -T` when available, else the main config file
fn sshd_value(system: &dyn SystemCollaborator, keyword: &str) -> Option<String> {
    let effective = system.run("sshd", &["-T"], CHECK_TIMEOUT);
    if effective.success() {
        if let Some(value) = parse_sshd_option(&effective.stdout, keyword) {
            return Some(value.to_lowercase());
        }
    }
    read(system, "/etc/ssh/sshd_config")
        .and_then(|config| parse_sshd_option(&config, keyword))
        .map(|v| v.to_lowercase())
}

pub fn tmp_partition(system: &dyn SystemCollaborator) -> Verdict {
    let out = system.run("findmnt", &["-n", "/tmp"], CHECK_TIMEOUT);
    if out.exit_code == 127 {
        Verdict::new(NotApplicable, "findmnt unavailable")
    } else if out.success() && !out.stdout.trim().is_empty() {
        Verdict::new(Pass, "")
    } else {
        Verdict::new(Warn, "/tmp shares the root filesystem")
    }
}

pub fn apparmor_enabled(system: &dyn SystemCollaborator) -> Verdict {
    let out = system.run("aa-status", &["--enabled"], CHECK_TIMEOUT);
    match out.exit_code {
        0 => Verdict::new(Pass, ""),
        127 => Verdict::new(NotApplicable, "AppArmor tools not installed"),
        _ => Verdict::new(Fail, "AppArmor is disabled"),
    }
}

pub fn automatic_updates(system: &dyn SystemCollaborator) -> Verdict {
    let configured = read(system, "/etc/apt/apt.conf.d/20auto-upgrades")
        .map(|c| c.contains("Unattended-Upgrade \"1\""))
        .unwrap_or(false);
    if configured || system.service_active("unattended-upgrades") {
        Verdict::new(Pass, "")
    } else {
        Verdict::new(Fail, "unattended-upgrades not configured")
    }
}

pub fn ip_forwarding_disabled(system: &dyn SystemCollaborator) -> Verdict {
    match proc_flag(system, "/proc/sys/net/ipv4/ip_forward").as_deref() {
        Some("0") => Verdict::new(Pass, ""),
        Some(v) => Verdict::new(Fail, format!("net.ipv4.ip_forward = {}", v)),
        None => Verdict::new(NotApplicable, "sysctl value unreadable"),
    }
}

pub fn syn_cookies(system: &dyn SystemCollaborator) -> Verdict {
    match proc_flag(system, "/proc/sys/net/ipv4/tcp_syncookies").as_deref() {
        Some("1") => Verdict::new(Pass, ""),
        Some(v) => Verdict::new(Fail, format!("net.ipv4.tcp_syncookies = {}", v)),
        None => Verdict::new(NotApplicable, "sysctl value unreadable"),
    }
}

pub fn firewall_active(system: &dyn SystemCollaborator) -> Verdict {
    let out = system.run("ufw", &["status", "verbose"], CHECK_TIMEOUT);
    if out.exit_code == 127 {
        return Verdict::new(Fail, "ufw not installed");
    }
    if parse_ufw_status(&out.stdout).active {
        Verdict::new(Pass, "")
    } else {
        Verdict::new(Fail, "ufw inactive")
    }
}

pub fn default_deny_incoming(system: &dyn SystemCollaborator) -> Verdict {
    let out = system.run("ufw", &["status", "verbose"], CHECK_TIMEOUT);
    let status = parse_ufw_status(&out.stdout);
    if !status.active {
        return Verdict::new(Fail, "firewall inactive");
    }
    match status.default_incoming.as_deref() {
        Some("deny") | Some("reject") => Verdict::new(Pass, ""),
        Some(policy) => Verdict::new(Fail, format!("incoming policy is {}", policy)),
        None => Verdict::new(Warn, "incoming policy not reported"),
    }
}

pub fn auditd_active(system: &dyn SystemCollaborator) -> Verdict {
    if system.service_active("auditd") {
        Verdict::new(Pass, "")
    } else {
        Verdict::new(Fail, "auditd not running")
    }
}

pub fn fail2ban_active(system: &dyn SystemCollaborator) -> Verdict {
    if system.service_active("fail2ban") {
        Verdict::new(Pass, "")
    } else {
        Verdict::new(Fail, "fail2ban not running")
    }
}

pub fn ssh_root_login(system: &dyn SystemCollaborator) -> Verdict {
    match sshd_value(system, "PermitRootLogin").as_deref() {
        Some("no") | Some("prohibit-password") | Some("without-password") => {
            Verdict::new(Pass, "")
        }
        Some(value) => Verdict::new(Fail, format!("PermitRootLogin {}", value)),
        None if !system.service_exists(ssh_service_name(system)) => {
            Verdict::new(NotApplicable, "no SSH server")
        }
        // Compiled-in default is prohibit-password
        None => Verdict::new(Pass, "default prohibit-password"),
    }
}

pub fn ssh_password_auth(system: &dyn SystemCollaborator) -> Verdict {
    match sshd_value(system, "PasswordAuthentication").as_deref() {
        Some("no") => Verdict::new(Pass, ""),
        Some(_) => Verdict::new(Warn, "password logins allowed"),
        None if !system.service_exists(ssh_service_name(system)) => {
            Verdict::new(NotApplicable, "no SSH server")
        }
        None => Verdict::new(Warn, "password logins allowed by default"),
    }
}

/// Fewer than `SUDO_GRANT_LIMIT` broad grants passes; more is a warning.
pub fn sudo_grants(system: &dyn SystemCollaborator) -> Verdict {
    let Some(sudoers) = read(system, "/etc/sudoers") else {
        return Verdict::new(NotApplicable, "/etc/sudoers unreadable");
    };
    let grants = count_broad_sudo_grants(&sudoers);
    if grants < SUDO_GRANT_LIMIT {
        Verdict::new(Pass, format!("{} broad grant(s)", grants))
    } else {
        Verdict::new(Warn, format!("{} broad grants", grants))
    }
}

pub fn password_max_age(system: &dyn SystemCollaborator) -> Verdict {
    let Some(defs) = read(system, "/etc/login.defs") else {
        return Verdict::new(NotApplicable, "/etc/login.defs unreadable");
    };
    match login_defs_value(&defs, "PASS_MAX_DAYS") {
        Some(days) if days <= PASS_MAX_DAYS_LIMIT => {
            Verdict::new(Pass, format!("PASS_MAX_DAYS {}", days))
        }
        Some(days) => Verdict::new(Warn, format!("PASS_MAX_DAYS {}", days)),
        None => Verdict::new(Warn, "PASS_MAX_DAYS unset"),
    }
}

pub fn single_uid_zero(system: &dyn SystemCollaborator) -> Verdict {
    let Some(passwd) = read(system, "/etc/passwd") else {
        return Verdict::new(NotApplicable, "/etc/passwd unreadable");
    };
    let accounts = uid_zero_accounts(&passwd);
    let extra: Vec<&str> = accounts
        .iter()
        .map(String::as_str)
        .filter(|a| *a != "root")
        .collect();
    if extra.is_empty() {
        Verdict::new(Pass, "")
    } else {
        Verdict::new(Fail, format!("UID 0 also held by {}", extra.join(", ")))
    }
}

pub fn no_empty_passwords(system: &dyn SystemCollaborator) -> Verdict {
    let Some(shadow) = read(system, "/etc/shadow") else {
        return Verdict::new(NotApplicable, "/etc/shadow unreadable");
    };
    let empty = empty_password_accounts(&shadow);
    if empty.is_empty() {
        Verdict::new(Pass, "")
    } else {
        Verdict::new(Fail, format!("empty password: {}", empty.join(", ")))
    }
}

pub fn listening_ports(system: &dyn SystemCollaborator) -> Verdict {
    let out = system.run("ss", &["-tuln"], CHECK_TIMEOUT);
    if !out.success() {
        return Verdict::new(NotApplicable, "ss unavailable");
    }
    let count = count_listening_ports(&out.stdout);
    if count < LISTENING_PORT_LIMIT {
        Verdict::new(Pass, format!("{} listening socket(s)", count))
    } else {
        Verdict::new(Warn, format!("{} listening sockets", count))
    }
}

pub fn malware_scanner(system: &dyn SystemCollaborator) -> Verdict {
    let found: Vec<&str> = ["rkhunter", "chkrootkit", "clamscan"]
        .into_iter()
        .filter(|tool| system.command_exists(tool))
        .collect();
    if found.is_empty() {
        Verdict::new(Warn, "no rootkit or malware scanner installed")
    } else {
        Verdict::new(Pass, found.join(", "))
    }
}
