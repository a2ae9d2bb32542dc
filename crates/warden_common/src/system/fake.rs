//! In-memory system collaborator for tests
//!
//! Emulates just enough of systemctl, ufw, dpkg-query, apt-get, ping and
//! which for warden's logic to be exercised without a live host. Every
//! command is recorded; scripted responses (matched by command-line prefix)
//! take precedence over the emulation.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{CommandOutput, OsRelease, SystemCollaborator};

/// systemd unit state as seen by the fake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Active,
    Inactive,
    Failed,
}

/// ufw state tracked by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeFirewall {
    pub active: bool,
    pub default_incoming: String,
    pub default_outgoing: String,
    /// ALLOW IN targets
    pub rules: Vec<String>,
    /// DENY IN targets
    pub denied: Vec<String>,
}

impl Default for FakeFirewall {
    fn default() -> Self {
        Self {
            active: false,
            default_incoming: "deny".to_string(),
            default_outgoing: "allow".to_string(),
            rules: Vec::new(),
            denied: Vec::new(),
        }
    }
}

impl FakeFirewall {
    /// Text in the shape of `ufw status verbose`
    pub fn render_status(&self) -> String {
        if !self.active {
            return "Status: inactive\n".to_string();
        }

        let mut out = String::from("Status: active\nLogging: on (low)\n");
        out.push_str(&format!(
            "Default: {} (incoming), {} (outgoing), disabled (routed)\n",
            self.default_incoming, self.default_outgoing
        ));
        out.push_str("New profiles: skip\n\n");
        out.push_str("To                         Action      From\n");
        out.push_str("--                         ------      ----\n");
        for rule in &self.denied {
            out.push_str(&format!("{:<27}DENY IN     Anywhere\n", rule));
        }
        for rule in &self.rules {
            out.push_str(&format!("{:<27}ALLOW IN    Anywhere\n", rule));
        }
        out
    }
}

#[derive(Debug, Default)]
struct FakeState {
    commands: Vec<String>,
    stdin_inputs: Vec<String>,
    responses: Vec<(String, CommandOutput)>,
    services: BTreeMap<String, ServiceState>,
    enabled: BTreeSet<String>,
    broken: BTreeSet<String>,
    packages: BTreeSet<String>,
    commands_available: BTreeSet<String>,
    reachable: BTreeSet<String>,
    files: BTreeMap<PathBuf, String>,
    firewall: FakeFirewall,
    root: bool,
    hostname: String,
    os: Option<OsRelease>,
    kernel: String,
    free_bytes: Option<u64>,
    disk_usage: Option<u8>,
    load: f64,
    cpus: usize,
}

/// Scriptable host double.
#[derive(Debug)]
pub struct FakeSystem {
    state: RefCell<FakeState>,
}

impl Default for FakeSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn unit_name(name: &str) -> String {
    name.trim_end_matches(".service").to_string()
}

impl FakeSystem {
    /// Bare host: not root, nothing installed, nothing reachable.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(FakeState {
                hostname: "testhost".to_string(),
                kernel: "6.8.0-test".to_string(),
                cpus: 1,
                ..Default::default()
            }),
        }
    }

    /// Root on Ubuntu 22.04 with plenty of disk, network, SSH up and ufw active.
    pub fn healthy() -> Self {
        let system = Self::new()
            .with_root(true)
            .with_os("ubuntu", "22.04")
            .with_free_space(50 * 1024 * 1024 * 1024)
            .with_disk_usage(40)
            .with_load(0.5, 4)
            .with_reachable("8.8.8.8")
            .with_reachable("1.1.1.1")
            .with_service("ssh", ServiceState::Active)
            .with_service("ufw", ServiceState::Active);
        {
            let mut state = system.state.borrow_mut();
            state.firewall = FakeFirewall {
                active: true,
                rules: vec!["22/tcp".to_string()],
                ..Default::default()
            };
        }
        system
    }

    pub fn with_root(self, root: bool) -> Self {
        self.state.borrow_mut().root = root;
        self
    }

    pub fn with_os(self, id: &str, version: &str) -> Self {
        self.state.borrow_mut().os = Some(OsRelease {
            id: id.to_string(),
            version_id: version.to_string(),
            pretty_name: format!("{} {}", id, version),
        });
        self
    }

    pub fn with_free_space(self, bytes: u64) -> Self {
        self.state.borrow_mut().free_bytes = Some(bytes);
        self
    }

    pub fn with_disk_usage(self, percent: u8) -> Self {
        self.set_disk_usage(percent);
        self
    }

    pub fn with_load(self, load: f64, cpus: usize) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.load = load;
            state.cpus = cpus;
        }
        self
    }

    pub fn with_reachable(self, host: &str) -> Self {
        self.state.borrow_mut().reachable.insert(host.to_string());
        self
    }

    pub fn with_service(self, name: &str, state: ServiceState) -> Self {
        self.set_service(name, state);
        self
    }

    /// Service that fails again whenever it is started
    pub fn with_broken_service(self, name: &str) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.broken.insert(unit_name(name));
            state.services.insert(unit_name(name), ServiceState::Failed);
        }
        self
    }

    pub fn with_package(self, name: &str) -> Self {
        self.state.borrow_mut().packages.insert(name.to_string());
        self
    }

    pub fn with_command(self, program: &str) -> Self {
        self.state
            .borrow_mut()
            .commands_available
            .insert(program.to_string());
        self
    }

    pub fn with_file(self, path: impl AsRef<Path>, content: &str) -> Self {
        self.set_file(path, content);
        self
    }

    pub fn with_firewall(self, firewall: FakeFirewall) -> Self {
        self.state.borrow_mut().firewall = firewall;
        self
    }

    /// Scripted output for any command line starting with `prefix`
    pub fn with_response(self, prefix: &str, output: CommandOutput) -> Self {
        self.respond(prefix, output);
        self
    }

    pub fn respond(&self, prefix: &str, output: CommandOutput) {
        self.state
            .borrow_mut()
            .responses
            .push((prefix.to_string(), output));
    }

    pub fn set_service(&self, name: &str, state: ServiceState) {
        self.state
            .borrow_mut()
            .services
            .insert(unit_name(name), state);
    }

    pub fn set_disk_usage(&self, percent: u8) {
        self.state.borrow_mut().disk_usage = Some(percent);
    }

    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut state = self.state.borrow_mut();
        if reachable {
            state.reachable.insert(host.to_string());
        } else {
            state.reachable.remove(host);
        }
    }

    pub fn set_file(&self, path: impl AsRef<Path>, content: &str) {
        self.state
            .borrow_mut()
            .files
            .insert(path.as_ref().to_path_buf(), content.to_string());
    }

    /// Every command line run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    pub fn stdin_inputs(&self) -> Vec<String> {
        self.state.borrow().stdin_inputs.clone()
    }

    pub fn firewall(&self) -> FakeFirewall {
        self.state.borrow().firewall.clone()
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.state.borrow().services.get(&unit_name(name)).copied()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.state.borrow().enabled.contains(&unit_name(name))
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.state.borrow().packages.contains(name)
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.borrow().files.get(path.as_ref()).cloned()
    }

    fn dispatch(&self, program: &str, args: &[&str]) -> CommandOutput {
        match program {
            "env" => {
                // env VAR=value program args...
                let rest: Vec<&str> = args
                    .iter()
                    .copied()
                    .skip_while(|a| a.contains('='))
                    .collect();
                match rest.split_first() {
                    Some((inner, inner_args)) => self.dispatch(inner, inner_args),
                    None => CommandOutput::ok(""),
                }
            }
            "systemctl" => self.systemctl(args),
            "ufw" => self.ufw(args),
            "ping" => {
                let host = args.last().copied().unwrap_or_default();
                if self.state.borrow().reachable.contains(host) {
                    CommandOutput::ok("1 packets transmitted, 1 received")
                } else {
                    CommandOutput::failed(1, "1 packets transmitted, 0 received")
                }
            }
            "which" => {
                let name = args.first().copied().unwrap_or_default();
                if self.state.borrow().commands_available.contains(name) {
                    CommandOutput::ok(format!("/usr/bin/{}\n", name))
                } else {
                    CommandOutput::failed(1, "")
                }
            }
            "dpkg-query" => {
                let package = args.last().copied().unwrap_or_default();
                if self.state.borrow().packages.contains(package) {
                    CommandOutput::ok("install ok installed")
                } else {
                    CommandOutput::failed(
                        1,
                        format!("dpkg-query: no packages found matching {}", package),
                    )
                }
            }
            "apt-get" => {
                if let Some(pos) = args.iter().position(|a| *a == "install") {
                    let mut state = self.state.borrow_mut();
                    for package in args[pos + 1..].iter().filter(|a| !a.starts_with('-')) {
                        state.packages.insert(package.to_string());
                    }
                }
                CommandOutput::ok("")
            }
            _ => CommandOutput::ok(""),
        }
    }

    fn systemctl(&self, args: &[&str]) -> CommandOutput {
        let positional: Vec<&str> = args
            .iter()
            .copied()
            .filter(|a| !a.starts_with("--"))
            .collect();

        if args.contains(&"--failed") {
            let state = self.state.borrow();
            let listing: String = state
                .services
                .iter()
                .filter(|(_, s)| **s == ServiceState::Failed)
                .map(|(name, _)| format!("{}.service loaded failed failed {}\n", name, name))
                .collect();
            return CommandOutput::ok(listing);
        }

        let (verb, name) = match positional.as_slice() {
            [verb, name, ..] => (*verb, unit_name(name)),
            _ => return CommandOutput::failed(1, "Too few arguments."),
        };

        let mut state = self.state.borrow_mut();
        match verb {
            "is-active" => match state.services.get(&name) {
                Some(ServiceState::Active) => CommandOutput::ok("active"),
                Some(ServiceState::Failed) => CommandOutput {
                    exit_code: 3,
                    stdout: "failed".to_string(),
                    ..Default::default()
                },
                _ => CommandOutput {
                    exit_code: 3,
                    stdout: "inactive".to_string(),
                    ..Default::default()
                },
            },
            "is-enabled" => {
                if state.enabled.contains(&name) {
                    CommandOutput::ok("enabled")
                } else {
                    CommandOutput {
                        exit_code: 1,
                        stdout: "disabled".to_string(),
                        ..Default::default()
                    }
                }
            }
            "list-unit-files" => {
                if state.services.contains_key(&name) {
                    CommandOutput::ok(format!("{}.service enabled enabled\n", name))
                } else {
                    CommandOutput::ok("")
                }
            }
            "start" | "restart" => {
                if state.broken.contains(&name) {
                    state.services.insert(name.clone(), ServiceState::Failed);
                    CommandOutput::failed(
                        1,
                        format!("Job for {}.service failed because the control process exited with error code.", name),
                    )
                } else {
                    state.services.insert(name, ServiceState::Active);
                    CommandOutput::ok("")
                }
            }
            "stop" => {
                state.services.insert(name, ServiceState::Inactive);
                CommandOutput::ok("")
            }
            "reload" => CommandOutput::ok(""),
            "enable" => {
                state.enabled.insert(name.clone());
                if args.contains(&"--now") && !state.broken.contains(&name) {
                    state.services.insert(name, ServiceState::Active);
                }
                CommandOutput::ok("")
            }
            "disable" => {
                state.enabled.remove(&name);
                CommandOutput::ok("")
            }
            "reset-failed" => {
                if state.services.get(&name) == Some(&ServiceState::Failed) {
                    state.services.insert(name, ServiceState::Inactive);
                }
                CommandOutput::ok("")
            }
            other => CommandOutput::failed(1, format!("Unknown command verb {}.", other)),
        }
    }

    fn ufw(&self, args: &[&str]) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        let fw = &mut state.firewall;

        match args {
            ["status", ..] => CommandOutput::ok(fw.render_status()),
            ["--force", "reset"] | ["reset"] => {
                *fw = FakeFirewall::default();
                CommandOutput::ok("Resetting all rules to installed defaults.")
            }
            ["default", policy, direction] => {
                match *direction {
                    "incoming" => fw.default_incoming = policy.to_string(),
                    "outgoing" => fw.default_outgoing = policy.to_string(),
                    _ => {}
                }
                CommandOutput::ok(format!(
                    "Default {} policy changed to '{}'",
                    direction, policy
                ))
            }
            ["allow", rule @ ..] => {
                let rule = rule.join(" ");
                if fw.rules.contains(&rule) {
                    CommandOutput::ok("Skipping adding existing rule")
                } else if fw.denied.contains(&rule) {
                    fw.denied.retain(|r| *r != rule);
                    fw.rules.push(rule);
                    CommandOutput::ok("Rule updated")
                } else {
                    fw.rules.push(rule);
                    CommandOutput::ok("Rule added")
                }
            }
            ["deny", rule @ ..] => {
                let rule = rule.join(" ");
                fw.rules.retain(|r| *r != rule);
                if !fw.denied.contains(&rule) {
                    fw.denied.push(rule);
                }
                CommandOutput::ok("Rule added")
            }
            ["delete", "allow", rule @ ..] => {
                let rule = rule.join(" ");
                fw.rules.retain(|r| *r != rule);
                CommandOutput::ok("Rule deleted")
            }
            ["--force", "enable"] | ["enable"] => {
                fw.active = true;
                CommandOutput::ok("Firewall is active and enabled on system startup")
            }
            ["disable"] => {
                fw.active = false;
                CommandOutput::ok("Firewall stopped and disabled on system startup")
            }
            ["reload"] => {
                if fw.active {
                    CommandOutput::ok("Firewall reloaded")
                } else {
                    CommandOutput::failed(1, "Firewall not enabled (skipping reload)")
                }
            }
            _ => CommandOutput::failed(1, "ERROR: Invalid syntax"),
        }
    }
}

impl SystemCollaborator for FakeSystem {
    fn run(&self, program: &str, args: &[&str], _timeout: Duration) -> CommandOutput {
        let line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        self.state.borrow_mut().commands.push(line.clone());

        let scripted = self
            .state
            .borrow()
            .responses
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone());

        match scripted {
            Some(output) => output,
            None => self.dispatch(program, args),
        }
    }

    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
        timeout: Duration,
    ) -> CommandOutput {
        self.state.borrow_mut().stdin_inputs.push(input.to_string());
        self.run(program, args, timeout)
    }

    fn is_root(&self) -> bool {
        self.state.borrow().root
    }

    fn hostname(&self) -> String {
        self.state.borrow().hostname.clone()
    }

    fn os_release(&self) -> Option<OsRelease> {
        self.state.borrow().os.clone()
    }

    fn kernel_version(&self) -> String {
        self.state.borrow().kernel.clone()
    }

    fn free_space_bytes(&self, _path: &Path) -> Option<u64> {
        self.state.borrow().free_bytes
    }

    fn disk_usage_percent(&self, _path: &Path) -> Option<u8> {
        self.state.borrow().disk_usage
    }

    fn load_average_1m(&self) -> f64 {
        self.state.borrow().load
    }

    fn cpu_count(&self) -> usize {
        self.state.borrow().cpus
    }

    fn read_file(&self, path: &Path) -> std::io::Result<String> {
        self.state.borrow().files.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })
    }

    fn write_file(&self, path: &Path, contents: &str, _mode: u32) -> std::io::Result<()> {
        self.set_file(path, contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        match self.state.borrow_mut().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )),
        }
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.state
            .borrow()
            .files
            .keys()
            .any(|p| p == path || p.starts_with(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::parse_ufw_status;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn test_records_commands() {
        let system = FakeSystem::new();
        system.run("apt-get", &["update"], T);
        system.run("uptime", &[], T);
        assert_eq!(system.commands(), vec!["apt-get update", "uptime"]);
    }

    #[test]
    fn test_scripted_response_wins() {
        let system = FakeSystem::new().with_response("df", CommandOutput::failed(2, "boom"));
        assert_eq!(system.run("df", &["-h"], T).exit_code, 2);
    }

    #[test]
    fn test_systemctl_emulation() {
        let system = FakeSystem::new().with_service("nginx", ServiceState::Inactive);
        assert!(!system.service_active("nginx"));
        assert!(system.service_exists("nginx"));
        assert!(!system.service_exists("postfix"));

        system.run("systemctl", &["restart", "nginx.service"], T);
        assert!(system.service_active("nginx"));
    }

    #[test]
    fn test_broken_service_fails_again() {
        let system = FakeSystem::new().with_broken_service("mysql");
        let output = system.run("systemctl", &["restart", "mysql"], T);
        assert!(!output.success());
        assert_eq!(system.service_state("mysql"), Some(ServiceState::Failed));
    }

    #[test]
    fn test_ufw_emulation_round_trips_through_parser() {
        let system = FakeSystem::new();
        system.run("ufw", &["default", "deny", "incoming"], T);
        system.run("ufw", &["allow", "22/tcp"], T);
        system.run("ufw", &["allow", "22/tcp"], T);
        system.run("ufw", &["--force", "enable"], T);

        let status = parse_ufw_status(&system.run("ufw", &["status", "verbose"], T).stdout);
        assert!(status.active);
        assert_eq!(status.default_incoming.as_deref(), Some("deny"));
        assert_eq!(status.allowed(), vec!["22/tcp"]);
    }

    #[test]
    fn test_env_prefix_is_transparent() {
        let system = FakeSystem::new();
        system.run(
            "env",
            &["DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y", "ufw"],
            T,
        );
        assert!(system.has_package("ufw"));
    }
}
