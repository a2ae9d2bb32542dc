//! Recovery actions

use std::collections::BTreeSet;
use std::path::Path;

use super::{EmergencyEngine, RecoveryReport};
use crate::parsers::{parse_default_interface, parse_failed_units, parse_first_interface, parse_ufw_status};
use crate::system::{active_web_server, ssh_service_name, ServiceAction};

/// Break-glass sshd drop-in. The `00-` prefix makes it the first include, and
/// sshd keeps the first value it reads for each keyword.
pub const EMERGENCY_SSH_FRAGMENT: &str = "/etc/ssh/sshd_config.d/00-warden-emergency.conf";

/// resolved drop-in carrying the fallback DNS servers
pub const DNS_FALLBACK_DROPIN: &str = "/etc/systemd/resolved.conf.d/99-warden-dns.conf";

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";
const UFW_RULE_FILES: &[&str] = &["/etc/ufw/user.rules", "/etc/ufw/user6.rules"];

fn emergency_ssh_config(port: u16) -> String {
    format!(
        "# Written by warden emergency recovery. Remove once normal access works.\n\
         Port {}\n\
         PermitRootLogin yes\n\
         PasswordAuthentication yes\n\
         PubkeyAuthentication yes\n\
         UsePAM yes\n",
        port
    )
}

impl<'a> EmergencyEngine<'a> {
    /// Install a permissive SSH fragment and restart sshd.
    ///
    /// `root_password`, when given, becomes a temporary root password.
    pub fn recover_ssh(&self, root_password: Option<&str>) -> RecoveryReport {
        let mut report = RecoveryReport::new("recover-ssh");
        let timeout = self.config.timeouts.command();
        let fragment = Path::new(EMERGENCY_SSH_FRAGMENT);
        let desired = emergency_ssh_config(self.config.hardening.ssh_port);

        self.safety_copy(&mut report, Path::new(SSHD_CONFIG));

        let current = self.system.read_file(fragment).ok();
        if current.as_deref() == Some(desired.as_str()) {
            report.note(self.log, format!("{} already in place", EMERGENCY_SSH_FRAGMENT));
        } else {
            match self.system.write_file(fragment, &desired, 0o644) {
                Ok(()) => report.ok(self.log, format!("Wrote {}", EMERGENCY_SSH_FRAGMENT)),
                Err(e) => {
                    report.fail(self.log, format!("Cannot write {}: {}", EMERGENCY_SSH_FRAGMENT, e));
                    return report;
                }
            }
        }

        let check = self.system.run("sshd", &["-t"], timeout);
        if !check.success() {
            report.fail(
                self.log,
                format!("sshd rejected the configuration: {}", check.reason()),
            );
            if let Err(e) = self.system.remove_file(fragment) {
                report.warn(self.log, format!("Could not remove fragment: {}", e));
            }
            return report;
        }

        let unit = ssh_service_name(self.system);
        let restart = self.system.service_action(unit, ServiceAction::Restart);
        if restart.success() && self.system.service_active(unit) {
            report.ok(self.log, format!("{} restarted and active", unit));
        } else {
            report.fail(
                self.log,
                format!("{} did not come back: {}", unit, restart.reason()),
            );
        }

        if let Some(password) = root_password {
            let input = format!("root:{}\n", password);
            let out = self.system.run_with_stdin("chpasswd", &[], &input, timeout);
            if out.success() {
                report.ok(self.log, "Temporary root password set; change it after recovery");
            } else {
                report.fail(self.log, format!("chpasswd failed: {}", out.reason()));
            }
        }

        report
    }

    /// Cycle the primary interface, restart networking and renew DHCP; fall
    /// back to public resolvers if the host is still offline.
    pub fn recover_network(&self) -> RecoveryReport {
        let mut report = RecoveryReport::new("recover-network");
        let timeout = self.config.timeouts.command();

        let route = self.system.run("ip", &["route", "show", "default"], timeout);
        let interface = parse_default_interface(&route.stdout).or_else(|| {
            let links = self.system.run("ip", &["-o", "link", "show"], timeout);
            parse_first_interface(&links.stdout)
        });
        let Some(interface) = interface else {
            report.fail(self.log, "No network interface found");
            return report;
        };
        report.note(self.log, format!("Primary interface: {}", interface));

        for state in ["down", "up"] {
            let out = self
                .system
                .run("ip", &["link", "set", interface.as_str(), state], timeout);
            if out.success() {
                report.ok(self.log, format!("ip link set {} {}", interface, state));
            } else {
                report.fail(
                    self.log,
                    format!("ip link set {} {}: {}", interface, state, out.reason()),
                );
            }
        }

        let manager = ["NetworkManager", "systemd-networkd"]
            .into_iter()
            .find(|unit| self.system.service_exists(unit));
        match manager {
            Some(unit) => {
                let out = self.system.service_action(unit, ServiceAction::Restart);
                if out.success() {
                    report.ok(self.log, format!("Restarted {}", unit));
                } else {
                    report.fail(self.log, format!("Restart of {} failed: {}", unit, out.reason()));
                }
            }
            None => report.note(self.log, "No network manager service found"),
        }

        if self.system.command_exists("dhclient") {
            self.system.run("dhclient", &["-r", interface.as_str()], timeout);
            let out = self.system.run("dhclient", &[interface.as_str()], timeout);
            if out.success() {
                report.ok(self.log, format!("New DHCP lease on {}", interface));
            } else {
                report.warn(self.log, format!("dhclient: {}", out.reason()));
            }
        } else if manager == Some("systemd-networkd") {
            let out = self.system.run("networkctl", &["renew", interface.as_str()], timeout);
            if !out.success() {
                report.warn(self.log, format!("networkctl renew: {}", out.reason()));
            }
        }

        if self.connected() {
            report.ok(self.log, "Network connectivity restored");
            return report;
        }

        report.warn(self.log, "Still offline; applying fallback DNS resolvers");
        let servers = self.config.emergency.dns_fallback.join(" ");
        let dropin = format!("[Resolve]\nDNS={}\n", servers);
        match self.system.write_file(Path::new(DNS_FALLBACK_DROPIN), &dropin, 0o644) {
            Ok(()) => {
                self.system
                    .service_action("systemd-resolved", ServiceAction::Restart);
                report.ok(self.log, format!("Fallback DNS set to {}", servers));
            }
            Err(e) => report.fail(self.log, format!("Cannot write DNS fallback: {}", e)),
        }

        if self.connected() {
            report.ok(self.log, "Network connectivity restored");
        } else {
            report.fail(self.log, "Host is still offline after network recovery");
        }
        report
    }

    fn connected(&self) -> bool {
        let timeout = self.config.timeouts.ping();
        self.config
            .preflight
            .reach_hosts
            .iter()
            .any(|h| self.system.ping(h, timeout))
    }

    /// Rules the minimal policy allows: SSH, plus HTTP/HTTPS while a web
    /// server is running.
    fn minimal_rules(&self) -> Vec<String> {
        let mut rules = vec![format!("{}/tcp", self.config.hardening.ssh_port)];
        if let Some(server) = active_web_server(self.system) {
            self.log
                .info(format!("{} is active; allowing HTTP and HTTPS", server));
            rules.push("80/tcp".to_string());
            rules.push("443/tcp".to_string());
        }
        rules
    }

    /// Reset the firewall to default-deny incoming, allow outgoing, SSH open.
    ///
    /// A firewall already in exactly that state, with no other rules, is left
    /// untouched.
    pub fn recover_firewall(&self) -> RecoveryReport {
        let mut report = RecoveryReport::new("recover-firewall");
        self.apply_minimal_firewall(&mut report);
        report
    }

    pub(super) fn apply_minimal_firewall(&self, report: &mut RecoveryReport) {
        let timeout = self.config.timeouts.command();
        let rules = self.minimal_rules();

        let status = self.system.run("ufw", &["status", "verbose"], timeout);
        if status.exit_code == 127 {
            report.fail(self.log, "ufw is not installed");
            return;
        }
        let current = parse_ufw_status(&status.stdout);
        let wanted: BTreeSet<&str> = rules.iter().map(String::as_str).collect();
        let present: BTreeSet<&str> = current.allowed().into_iter().collect();
        if current.active
            && current.default_incoming.as_deref() == Some("deny")
            && current.default_outgoing.as_deref() == Some("allow")
            && current.restrictive().is_empty()
            && wanted == present
        {
            report.ok(self.log, "Firewall already matches the minimal policy");
            return;
        }

        for file in UFW_RULE_FILES {
            self.safety_copy(report, Path::new(file));
        }

        let mut steps: Vec<Vec<String>> = vec![
            vec!["--force".into(), "reset".into()],
            vec!["default".into(), "deny".into(), "incoming".into()],
            vec!["default".into(), "allow".into(), "outgoing".into()],
        ];
        steps.extend(rules.iter().map(|r| vec!["allow".to_string(), r.clone()]));
        steps.push(vec!["--force".into(), "enable".into()]);

        for args in &steps {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let out = self.system.run("ufw", &args, timeout);
            let label = format!("ufw {}", args.join(" "));
            if out.success() {
                report.ok(self.log, label);
            } else {
                report.fail(self.log, format!("{}: {}", label, out.reason()));
                return;
            }
        }
    }

    /// Reset and restart every failed unit, showing the log tail of any that
    /// keep failing.
    pub fn recover_services(&self) -> RecoveryReport {
        let mut report = RecoveryReport::new("recover-services");
        let timeout = self.config.timeouts.command();

        let listing = self.system.run(
            "systemctl",
            &["--failed", "--plain", "--no-legend", "--no-pager"],
            timeout,
        );
        if !listing.success() {
            report.fail(self.log, format!("Cannot list failed units: {}", listing.reason()));
            return report;
        }

        let failed = parse_failed_units(&listing.stdout);
        if failed.is_empty() {
            report.ok(self.log, "No failed units");
            return report;
        }
        report.note(self.log, format!("Failed units: {}", failed.join(", ")));

        for unit in &failed {
            self.system.service_action(unit, ServiceAction::ResetFailed);
            let out = self.system.service_action(unit, ServiceAction::Restart);
            if out.success() && self.system.service_active(unit) {
                report.ok(self.log, format!("{} restarted", unit));
                continue;
            }

            report.fail(self.log, format!("{} still failing: {}", unit, out.reason()));
            let tail = self
                .system
                .run("journalctl", &["-u", unit.as_str(), "-n", "20", "--no-pager"], timeout);
            for line in tail.stdout.lines() {
                self.log.info(format!("  {}", line));
            }
        }
        report
    }

    /// Free space: package caches, old kernels, journal, containers, temp files.
    pub fn recover_disk_space(&self) -> RecoveryReport {
        let mut report = RecoveryReport::new("recover-disk");
        let timeout = self.config.timeouts.command();
        let root = Path::new("/");
        let before = self.system.disk_usage_percent(root);

        let vacuum = format!("--vacuum-time={}d", self.config.emergency.journal_keep_days);
        let mut cleanups: Vec<(&str, Vec<&str>)> = vec![
            ("apt-get", vec!["clean"]),
            ("apt-get", vec!["-y", "autoremove", "--purge"]),
            ("journalctl", vec![vacuum.as_str()]),
        ];
        if self.system.command_exists("docker") {
            cleanups.push(("docker", vec!["system", "prune", "-af"]));
        }
        cleanups.push((
            "find",
            vec!["/tmp", "/var/tmp", "-mindepth", "1", "-mtime", "+7", "-delete"],
        ));

        for (program, args) in &cleanups {
            let label = format!("{} {}", program, args.join(" "));
            let out = self.system.run(program, args, timeout);
            if out.success() {
                report.ok(self.log, label);
            } else {
                report.fail(self.log, format!("{}: {}", label, out.reason()));
            }
        }

        let after = self.system.disk_usage_percent(root);
        match (before, after) {
            (Some(b), Some(a)) => report.note(self.log, format!("Disk usage on /: {}% -> {}%", b, a)),
            _ => report.note(self.log, "Disk usage on / unavailable"),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;
    use crate::logging::{LogLevel, StatusLog};
    use crate::system::{CommandOutput, FakeFirewall, FakeSystem, ServiceState};
    use std::path::PathBuf;

    fn config() -> WardenConfig {
        let dir = std::env::temp_dir().join(format!("warden-recovery-{}", std::process::id()));
        WardenConfig::default().rooted_at(&dir)
    }

    #[test]
    fn test_recover_ssh_writes_fragment_and_restarts() {
        let system = FakeSystem::healthy();
        system.set_service("ssh", ServiceState::Failed);
        let config = config();
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_ssh(None);
        assert!(report.success, "{:?}", report.steps);
        let fragment = system.file(EMERGENCY_SSH_FRAGMENT).unwrap();
        assert!(fragment.contains("PermitRootLogin yes"));
        assert_eq!(system.service_state("ssh"), Some(ServiceState::Active));
        assert!(system.stdin_inputs().is_empty());
    }

    #[test]
    fn test_failed_safety_copy_is_reported_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let mut config = WardenConfig::default().rooted_at(dir.path());
        config.paths.backup_root = blocker;

        let system = FakeSystem::healthy().with_file("/etc/ssh/sshd_config", "Port 22\n");
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_ssh(None);
        assert!(report.backup_failed());
        assert_eq!(report.unsaved, vec![PathBuf::from("/etc/ssh/sshd_config")]);
        assert!(report.steps.iter().any(|s| s.starts_with("backup failed:")));
        assert!(log.contains(LogLevel::Error, "No safety copy of /etc/ssh/sshd_config"));
        assert!(system.file(EMERGENCY_SSH_FRAGMENT).is_some());
    }

    #[test]
    fn test_recover_ssh_sets_password_only_when_given() {
        let system = FakeSystem::healthy();
        let config = config();
        let log = StatusLog::memory("recovery");

        EmergencyEngine::new(&system, &log, &config).recover_ssh(Some("s3cret"));
        assert_eq!(system.stdin_inputs(), vec!["root:s3cret\n"]);
        assert!(!log.entries().iter().any(|e| e.message.contains("s3cret")));
    }

    #[test]
    fn test_recover_ssh_rolls_back_invalid_config() {
        let system = FakeSystem::healthy()
            .with_response("sshd -t", CommandOutput::failed(255, "Bad configuration option"));
        let config = config();
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_ssh(None);
        assert!(!report.success);
        assert_eq!(system.file(EMERGENCY_SSH_FRAGMENT), None);
        assert!(system.commands_starting_with("systemctl restart").is_empty());
    }

    #[test]
    fn test_recover_firewall_adds_web_ports_for_active_server() {
        let system = FakeSystem::healthy()
            .with_service("nginx", ServiceState::Active)
            .with_firewall(FakeFirewall::default());
        let config = config();
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_firewall();
        assert!(report.success);
        assert_eq!(system.firewall().rules, vec!["22/tcp", "80/tcp", "443/tcp"]);
    }

    #[test]
    fn test_recover_services_restarts_failed_units() {
        let system = FakeSystem::healthy()
            .with_service("cron", ServiceState::Failed)
            .with_broken_service("mysql");
        system.set_service("mysql", ServiceState::Failed);
        let config = config();
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_services();
        assert!(!report.success);
        assert_eq!(system.service_state("cron"), Some(ServiceState::Active));
        assert_eq!(system.service_state("mysql"), Some(ServiceState::Failed));
        assert_eq!(system.commands_starting_with("journalctl -u mysql").len(), 1);
    }

    #[test]
    fn test_recover_services_with_nothing_failed() {
        let system = FakeSystem::healthy();
        let config = config();
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_services();
        assert!(report.success);
        assert!(system.commands_starting_with("systemctl restart").is_empty());
    }

    #[test]
    fn test_recover_network_falls_back_to_public_dns() {
        let system = FakeSystem::healthy()
            .with_response(
                "ip route show default",
                CommandOutput::ok("default via 10.0.0.1 dev ens3 proto dhcp\n"),
            )
            .with_service("systemd-resolved", ServiceState::Active);
        system.set_reachable("8.8.8.8", false);
        system.set_reachable("1.1.1.1", false);
        let config = config();
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_network();
        assert!(!report.success);
        assert_eq!(system.commands_starting_with("ip link set ens3").len(), 2);
        assert_eq!(
            system.file(DNS_FALLBACK_DROPIN).as_deref(),
            Some("[Resolve]\nDNS=1.1.1.1 8.8.8.8\n")
        );
    }

    #[test]
    fn test_recover_disk_space_reports_usage() {
        let system = FakeSystem::healthy().with_disk_usage(97).with_command("docker");
        let config = config();
        let log = StatusLog::memory("recovery");

        let report = EmergencyEngine::new(&system, &log, &config).recover_disk_space();
        assert!(report.success);
        assert_eq!(system.commands_starting_with("docker system prune").len(), 1);
        assert!(report.steps.iter().any(|s| s.contains("97%")));
        assert!(system.commands().contains(&"journalctl --vacuum-time=7d".to_string()));
    }
}
