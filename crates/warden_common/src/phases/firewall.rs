//! Host firewall (ufw), applied incrementally

use std::path::Path;

use super::safety_copy;
use crate::parsers::parse_ufw_status;
use crate::sequencer::{Phase, PhaseContext, PhaseOutcome};

const RULE_FILES: &[&str] = &["/etc/ufw/user.rules", "/etc/ufw/user6.rules"];

/// Default deny incoming, allow outgoing, SSH plus configured allow rules.
///
/// Existing rules that are not wanted are left alone; only missing pieces
/// are added. A wanted target listed under DENY, REJECT or LIMIT is not
/// allowed yet, so `ufw allow` is issued for it.
pub struct FirewallPhase {
    rules: Vec<String>,
}

impl FirewallPhase {
    pub fn new(ssh_port: u16, extra: Vec<String>) -> Self {
        let mut rules = vec![format!("{}/tcp", ssh_port)];
        for rule in extra {
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
        Self { rules }
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }
}

impl Phase for FirewallPhase {
    fn id(&self) -> &str {
        "firewall"
    }

    fn ordinal(&self) -> u32 {
        50
    }

    fn description(&self) -> &str {
        "Default-deny firewall with SSH allowed"
    }

    fn depends_on(&self) -> &[&'static str] {
        &["base-packages", "ssh-hardening"]
    }

    fn run(&self, ctx: &PhaseContext) -> PhaseOutcome {
        let timeout = ctx.config.timeouts.command();
        let status = ctx.system.run("ufw", &["status", "verbose"], timeout);
        if status.exit_code == 127 {
            return PhaseOutcome::Failed("ufw is not installed".to_string());
        }
        let current = parse_ufw_status(&status.stdout);

        let mut steps: Vec<Vec<&str>> = Vec::new();
        if current.default_incoming.as_deref() != Some("deny") {
            steps.push(vec!["default", "deny", "incoming"]);
        }
        if current.default_outgoing.as_deref() != Some("allow") {
            steps.push(vec!["default", "allow", "outgoing"]);
        }
        for rule in &self.rules {
            if !current.allows(rule) {
                steps.push(vec!["allow", rule.as_str()]);
            }
        }
        if !current.active {
            steps.push(vec!["--force", "enable"]);
        }

        if steps.is_empty() {
            return PhaseOutcome::Completed(format!(
                "firewall already active with {} rule(s)",
                current.rules.len()
            ));
        }

        for file in RULE_FILES {
            if let Err(e) = safety_copy(ctx, Path::new(file)) {
                return PhaseOutcome::Failed(format!("backup failed, firewall untouched: {}", e));
            }
        }

        for args in &steps {
            let out = ctx.system.run("ufw", args, timeout);
            if !out.success() {
                return PhaseOutcome::Failed(format!(
                    "ufw {}: {}",
                    args.join(" "),
                    out.reason()
                ));
            }
            ctx.log.info(format!("ufw {}", args.join(" ")));
        }

        PhaseOutcome::Completed(format!("{} firewall change(s) applied", steps.len()))
    }
}
