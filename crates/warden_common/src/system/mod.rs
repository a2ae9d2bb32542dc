//! System collaborator
//!
//! Everything warden does to the host (privileged commands, service control,
//! host configuration files, resource metrics) goes through the
//! `SystemCollaborator` trait so the core logic runs unchanged against the
//! real host (`HostSystem`) or an in-memory double (`FakeSystem`).
//!
//! Warden's own artifacts (backups, reports, logs, markers) live in
//! directories it owns and are handled with `std::fs` directly.

mod fake;
mod host;

pub use fake::{FakeFirewall, FakeSystem, ServiceState};
pub use host::HostSystem;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Ceiling for systemctl and other short control commands
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(90);

/// Result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code (-1 when killed or never started)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Killed after exceeding its timeout ceiling
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Short reason for logs: stderr, else stdout, else the exit code.
    pub fn reason(&self) -> String {
        if self.timed_out {
            return format!("timed out after {}ms", self.duration_ms);
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().last().unwrap_or(stderr).to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.lines().last().unwrap_or(stdout).to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

/// systemctl verbs used by warden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
    Disable,
    ResetFailed,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
            ServiceAction::ResetFailed => "reset-failed",
        }
    }
}

/// Parsed /etc/os-release
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
    pub pretty_name: String,
}

/// Narrow interface to the host.
pub trait SystemCollaborator {
    /// Run a program with arguments, killing it after `timeout`.
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> CommandOutput;

    /// Run a program feeding `input` on stdin.
    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
        timeout: Duration,
    ) -> CommandOutput;

    fn is_root(&self) -> bool;
    fn hostname(&self) -> String;
    fn os_release(&self) -> Option<OsRelease>;
    fn kernel_version(&self) -> String;

    /// Bytes available to unprivileged users on the filesystem holding `path`
    fn free_space_bytes(&self, path: &Path) -> Option<u64>;

    /// Used percentage of the filesystem holding `path`
    fn disk_usage_percent(&self, path: &Path) -> Option<u8>;

    fn load_average_1m(&self) -> f64;
    fn cpu_count(&self) -> usize;

    fn read_file(&self, path: &Path) -> std::io::Result<String>;
    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> std::io::Result<()>;
    fn remove_file(&self, path: &Path) -> std::io::Result<()>;
    fn path_exists(&self, path: &Path) -> bool;

    /// One ICMP echo to `host`
    fn ping(&self, host: &str, timeout: Duration) -> bool {
        let wait = timeout.as_secs().max(1).to_string();
        self.run(
            "ping",
            &["-c", "1", "-W", wait.as_str(), host],
            timeout + Duration::from_secs(1),
        )
        .success()
    }

    fn service_active(&self, name: &str) -> bool {
        self.run("systemctl", &["is-active", "--quiet", name], SERVICE_TIMEOUT)
            .success()
    }

    fn service_exists(&self, name: &str) -> bool {
        let unit = if name.contains('.') {
            name.to_string()
        } else {
            format!("{}.service", name)
        };
        let output = self.run(
            "systemctl",
            &["list-unit-files", unit.as_str(), "--no-legend", "--no-pager"],
            SERVICE_TIMEOUT,
        );
        output.success() && !output.stdout.trim().is_empty()
    }

    fn service_action(&self, name: &str, action: ServiceAction) -> CommandOutput {
        self.run("systemctl", &[action.as_str(), name], SERVICE_TIMEOUT)
    }

    fn command_exists(&self, program: &str) -> bool {
        self.run("which", &[program], SERVICE_TIMEOUT).success()
    }
}

/// Debian ships the OpenSSH unit as `ssh`, most other distributions as `sshd`.
pub fn ssh_service_name(system: &dyn SystemCollaborator) -> &'static str {
    if system.service_exists("ssh") {
        "ssh"
    } else {
        "sshd"
    }
}

/// Any known web server currently running
pub fn active_web_server(system: &dyn SystemCollaborator) -> Option<&'static str> {
    ["nginx", "apache2", "httpd", "caddy", "lighttpd"]
        .into_iter()
        .find(|name| system.service_active(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        assert!(CommandOutput::ok("fine").success());
        assert!(!CommandOutput::failed(1, "nope").success());

        let timed_out = CommandOutput {
            timed_out: true,
            ..CommandOutput::ok("")
        };
        assert!(!timed_out.success());
    }

    #[test]
    fn test_reason_prefers_last_stderr_line() {
        let output = CommandOutput::failed(100, "E: first\nE: Unable to locate package foo\n");
        assert_eq!(output.reason(), "E: Unable to locate package foo");
        assert_eq!(CommandOutput::failed(3, "").reason(), "exit code 3");
    }

    #[test]
    fn test_ssh_service_name() {
        let system = FakeSystem::new().with_service("ssh", ServiceState::Active);
        assert_eq!(ssh_service_name(&system), "ssh");

        let system = FakeSystem::new().with_service("sshd", ServiceState::Active);
        assert_eq!(ssh_service_name(&system), "sshd");
    }

    #[test]
    fn test_active_web_server() {
        let system = FakeSystem::new().with_service("nginx", ServiceState::Inactive);
        assert_eq!(active_web_server(&system), None);

        system.set_service("nginx", ServiceState::Active);
        assert_eq!(active_web_server(&system), Some("nginx"));
    }
}
