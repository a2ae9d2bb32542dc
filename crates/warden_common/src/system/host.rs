//! Real host implementation of the system collaborator

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Disks, System};
use tracing::{debug, warn};

use super::{CommandOutput, OsRelease, SystemCollaborator};
use crate::parsers::{parse_df_usage, parse_os_release};

/// Maximum output length to capture (prevent memory issues)
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Ceiling for the `df` fallback
const DF_TIMEOUT: Duration = Duration::from_secs(10);

/// How long output readers may lag behind the child's exit
const READER_GRACE: Duration = Duration::from_millis(500);

/// The machine warden is running on.
#[derive(Debug, Default)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }

    fn execute(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&str>,
        timeout: Duration,
    ) -> CommandOutput {
        let start = Instant::now();
        debug!("exec: {} {}", program, args.join(" "));

        // Own process group, so a timeout can take down every descendant.
        let spawned = Command::new(program)
            .args(args)
            .process_group(0)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let exit_code = if e.kind() == std::io::ErrorKind::NotFound {
                    127
                } else {
                    126
                };
                return CommandOutput {
                    exit_code,
                    stderr: format!("failed to execute {}: {}", program, e),
                    duration_ms: start.elapsed().as_millis() as u64,
                    ..Default::default()
                };
            }
        };

        if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
            // Dropping stdin closes the pipe so the child sees EOF.
            let _ = stdin.write_all(text.as_bytes());
        }

        let stdout_reader = child.stdout.take().map(OutputReader::spawn);
        let stderr_reader = child.stderr.take().map(OutputReader::spawn);

        let (exit_code, timed_out) = wait_with_timeout(&mut child, timeout, start);

        // Descendants that outlive the child keep the pipes open; give them
        // a short grace, then take the group down and keep what was read.
        let deadline = Instant::now() + READER_GRACE;
        let (stdout, stdout_done) = OutputReader::finish(stdout_reader, deadline);
        let (stderr, stderr_done) = OutputReader::finish(stderr_reader, deadline);
        if !(stdout_done && stderr_done) {
            warn!("{}: output still open after exit, killing process group", program);
            kill_group(&child);
        }

        CommandOutput {
            exit_code,
            stdout: truncate_output(&stdout),
            stderr: truncate_output(&stderr),
            timed_out,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Drains a pipe on its own thread into a shared, capped buffer.
struct OutputReader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl OutputReader {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&buf);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut out) = shared.lock() {
                            // One byte past the cap marks truncation
                            let room = (MAX_OUTPUT_BYTES + 1).saturating_sub(out.len());
                            out.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                }
            }
            let _ = tx.send(());
        });
        Self { buf, done }
    }

    /// Bytes read so far and whether the pipe reached EOF by `deadline`
    fn finish(reader: Option<Self>, deadline: Instant) -> (Vec<u8>, bool) {
        let Some(reader) = reader else {
            return (Vec::new(), true);
        };
        let finished = reader
            .done
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .is_ok();
        let bytes = reader
            .buf
            .lock()
            .map(|out| out.clone())
            .unwrap_or_default();
        (bytes, finished)
    }
}

/// SIGKILL the child's whole process group
fn kill_group(child: &Child) {
    if let Ok(pid) = i32::try_from(child.id()) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration, start: Instant) -> (i32, bool) {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return (status.code().unwrap_or(-1), false),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    kill_group(child);
                    let _ = child.kill();
                    let _ = child.wait();
                    return (-1, true);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(_) => {
                kill_group(child);
                let _ = child.kill();
                return (-1, false);
            }
        }
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    if bytes.len() > MAX_OUTPUT_BYTES {
        let mut text = String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).to_string();
        text.push_str("\n... (truncated)");
        text
    } else {
        String::from_utf8_lossy(bytes).to_string()
    }
}

/// Disk whose mount point is the longest prefix of `path`
fn disk_for(disks: &Disks, path: &Path) -> Option<(u64, u64)> {
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.total_space(), d.available_space()))
}

impl SystemCollaborator for HostSystem {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> CommandOutput {
        self.execute(program, args, None, timeout)
    }

    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &str,
        timeout: Duration,
    ) -> CommandOutput {
        self.execute(program, args, Some(input), timeout)
    }

    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn hostname(&self) -> String {
        System::host_name().unwrap_or_else(|| "unknown".to_string())
    }

    fn os_release(&self) -> Option<OsRelease> {
        fs::read_to_string("/etc/os-release")
            .ok()
            .map(|content| parse_os_release(&content))
    }

    fn kernel_version(&self) -> String {
        System::kernel_version().unwrap_or_else(|| "unknown".to_string())
    }

    fn free_space_bytes(&self, path: &Path) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        disk_for(&disks, path).map(|(_, available)| available)
    }

    fn disk_usage_percent(&self, path: &Path) -> Option<u8> {
        let disks = Disks::new_with_refreshed_list();
        match disk_for(&disks, path) {
            Some((total, available)) if total > 0 => {
                let used = total.saturating_sub(available);
                Some(((used * 100) / total).min(100) as u8)
            }
            // Overlay and bind mounts are often missing from the disk list
            _ => {
                let target = path.to_string_lossy();
                let out = self.run("df", &["-P", target.as_ref()], DF_TIMEOUT);
                if out.success() {
                    parse_df_usage(&out.stdout)
                } else {
                    None
                }
            }
        }
    }

    fn load_average_1m(&self) -> f64 {
        System::load_average().one
    }

    fn cpu_count(&self) -> usize {
        num_cpus::get()
    }

    fn read_file(&self, path: &Path) -> std::io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
