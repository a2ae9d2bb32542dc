//! Text parsing adapters
//!
//! Where no structured interface exists, decisions are made from tool output.
//! All of that parsing lives here as pure functions with regression tests:
//! - `ufw status verbose`
//! - `systemctl --failed --plain --no-legend`
//! - kernel log lines (`journalctl -k`)
//! - `df -P`, `ss -tuln`, `ip route`, `ip -o link`
//! - /etc/os-release, sshd_config, sudoers, login.defs, passwd, shadow

use serde::{Deserialize, Serialize};

use crate::system::OsRelease;

/// Kernel log markers that indicate a degraded host
pub const KERNEL_CRITICAL_MARKERS: &[&str] = &[
    "Kernel panic",
    "Out of memory",
    "oom-killer",
    "BUG: unable to handle",
    "soft lockup",
];

/// Parse /etc/os-release key=value pairs
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "ID" => release.id = value,
            "VERSION_ID" => release.version_id = value,
            "PRETTY_NAME" => release.pretty_name = value,
            _ => {}
        }
    }
    release
}

/// One row of the ufw rule table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UfwRule {
    /// "To" column
    pub target: String,
    /// "Action" column, e.g. "ALLOW IN", "DENY", "LIMIT IN"
    pub action: String,
}

impl UfwRule {
    /// Plain ALLOW rules only; LIMIT, DENY and REJECT are not allows.
    pub fn is_allow(&self) -> bool {
        self.action.split_whitespace().next() == Some("ALLOW")
    }
}

/// Parsed `ufw status verbose`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UfwStatus {
    pub active: bool,
    pub default_incoming: Option<String>,
    pub default_outgoing: Option<String>,
    /// Rule table in listed order, IPv6 duplicates dropped
    pub rules: Vec<UfwRule>,
}

impl UfwStatus {
    /// Targets of the ALLOW rules
    pub fn allowed(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.is_allow())
            .map(|r| r.target.as_str())
            .collect()
    }

    pub fn allows(&self, target: &str) -> bool {
        self.rules.iter().any(|r| r.is_allow() && r.target == target)
    }

    /// Rules that are not plain allows
    pub fn restrictive(&self) -> Vec<&UfwRule> {
        self.rules.iter().filter(|r| !r.is_allow()).collect()
    }
}

/// Parse `ufw status verbose`.
///
/// Rules:
/// - "Status: active" anywhere sets `active`
/// - "Default: deny (incoming), allow (outgoing), ..." gives the default policies
/// - every line after the "--" separator is a rule; columns are separated by
///   two or more spaces: target, action, source
/// - lines mentioning "(v6)" are skipped
pub fn parse_ufw_status(text: &str) -> UfwStatus {
    let mut status = UfwStatus::default();
    let mut in_rules = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(value) = trimmed.strip_prefix("Status:") {
            status.active = value.trim() == "active";
            continue;
        }

        if let Some(defaults) = trimmed.strip_prefix("Default:") {
            for part in defaults.split(',') {
                let part = part.trim();
                let Some((policy, direction)) = part.split_once(' ') else {
                    continue;
                };
                let direction = direction.trim_matches(|c| c == '(' || c == ')');
                match direction {
                    "incoming" => status.default_incoming = Some(policy.to_string()),
                    "outgoing" => status.default_outgoing = Some(policy.to_string()),
                    _ => {}
                }
            }
            continue;
        }

        if trimmed.starts_with("--") {
            in_rules = true;
            continue;
        }

        if in_rules && !trimmed.is_empty() && !trimmed.contains("(v6)") {
            let mut columns = trimmed.split("  ").map(str::trim).filter(|c| !c.is_empty());
            if let Some(target) = columns.next() {
                status.rules.push(UfwRule {
                    target: target.to_string(),
                    action: columns.next().unwrap_or_default().to_string(),
                });
            }
        }
    }

    status
}

/// Unit names from `systemctl --failed --plain --no-legend`
pub fn parse_failed_units(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().trim_start_matches('●').trim())
        .filter_map(|line| line.split_whitespace().next())
        .filter(|unit| unit.contains('.'))
        .map(String::from)
        .collect()
}

/// Which critical markers appear in a kernel log excerpt (deduplicated, in marker order)
pub fn kernel_log_markers(text: &str) -> Vec<&'static str> {
    KERNEL_CRITICAL_MARKERS
        .iter()
        .copied()
        .filter(|marker| text.contains(marker))
        .collect()
}

/// Use% of the first filesystem in `df -P` output
pub fn parse_df_usage(text: &str) -> Option<u8> {
    let line = text.lines().nth(1)?;
    let field = line.split_whitespace().nth(4)?;
    field.trim_end_matches('%').parse().ok()
}

/// Number of listening sockets in `ss -tuln` output (header excluded)
pub fn count_listening_ports(text: &str) -> usize {
    text.lines()
        .skip_while(|line| !line.starts_with("Netid"))
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count()
}

/// Packages `apt-get -s upgrade` would install or upgrade ("Inst" lines)
pub fn count_pending_upgrades(simulation: &str) -> usize {
    simulation
        .lines()
        .filter(|line| line.starts_with("Inst "))
        .count()
}

/// Interface of the default route in `ip route show default`
pub fn parse_default_interface(text: &str) -> Option<String> {
    text.lines()
        .filter(|line| line.starts_with("default"))
        .find_map(|line| {
            let mut words = line.split_whitespace();
            while let Some(word) = words.next() {
                if word == "dev" {
                    return words.next().map(String::from);
                }
            }
            None
        })
}

/// First non-loopback interface in `ip -o link show`
pub fn parse_first_interface(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim().split('@').next().unwrap_or("").to_string())
        .find(|name| !name.is_empty() && name != "lo")
}

/// First value of an sshd_config keyword (sshd honors the first occurrence)
pub fn parse_sshd_option(config: &str, keyword: &str) -> Option<String> {
    config
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next()?;
            if key.eq_ignore_ascii_case(keyword) {
                parts.next().map(|v| v.trim().to_string())
            } else {
                None
            }
        })
}

/// Sudoers lines granting unrestricted privilege, e.g. `alice ALL=(ALL:ALL) ALL`
pub fn count_broad_sudo_grants(sudoers: &str) -> usize {
    sudoers
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| !line.starts_with("Defaults"))
        .filter(|line| {
            let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
            compact.contains("ALL=(ALL")
        })
        .count()
}

/// Numeric value of a login.defs keyword
pub fn login_defs_value(content: &str, keyword: &str) -> Option<u32> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next()? == keyword {
                parts.next()?.parse().ok()
            } else {
                None
            }
        })
}

/// Accounts with UID 0 in /etc/passwd
pub fn uid_zero_accounts(passwd: &str) -> Vec<String> {
    passwd
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            (fields.len() >= 3 && fields[2] == "0").then(|| fields[0].to_string())
        })
        .collect()
}

/// Accounts whose password field in /etc/shadow is empty
pub fn empty_password_accounts(shadow: &str) -> Vec<String> {
    shadow
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let user = fields.next()?;
            let hash = fields.next()?;
            (!user.is_empty() && hash.is_empty()).then(|| user.to_string())
        })
        .collect()
}
