//! Point-in-time diagnostics report (read-only)

use std::fs;
use std::path::PathBuf;

use super::EmergencyEngine;
use crate::error::Result;

/// Sections of the diagnostics report: title, program, arguments
const SECTIONS: &[(&str, &str, &[&str])] = &[
    ("Uptime", "uptime", &[]),
    ("Memory", "free", &["-h"]),
    ("Disk", "df", &["-h"]),
    ("Interfaces", "ip", &["-brief", "address"]),
    ("Failed services", "systemctl", &["--failed", "--plain", "--no-legend", "--no-pager"]),
    ("Recent errors", "journalctl", &["-p", "err", "-n", "50", "--no-pager"]),
    ("Firewall", "ufw", &["status", "verbose"]),
    ("Connections", "ss", &["-tunap"]),
    ("Top processes", "ps", &["-eo", "pid,user,comm,%cpu,%mem", "--sort=-%cpu"]),
];

/// Lines kept from the process listing
const TOP_PROCESSES: usize = 15;

impl<'a> EmergencyEngine<'a> {
    /// Capture system state to `diagnostics-<timestamp>.txt` in the report dir.
    pub fn run_diagnostics(&self) -> Result<PathBuf> {
        let timeout = self.config.timeouts.command();
        let mut text = format!(
            "warden diagnostics\nHost: {}\nKernel: {}\nTaken: {}\n",
            self.system.hostname(),
            self.system.kernel_version(),
            chrono::Local::now().to_rfc3339()
        );

        for (title, program, args) in SECTIONS {
            self.log.debug(format!("Collecting {}", title));
            let out = self.system.run(program, args, timeout);
            text.push_str(&format!("\n=== {} ({} {}) ===\n", title, program, args.join(" ")));

            let body = if *program == "ps" {
                out.stdout
                    .lines()
                    .take(TOP_PROCESSES + 1)
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                out.stdout.trim_end().to_string()
            };
            if out.success() {
                text.push_str(&body);
            } else {
                text.push_str(&format!("unavailable: {}", out.reason()));
            }
            text.push('\n');
        }

        let dir = &self.config.paths.report_dir;
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("diagnostics-{}.txt", crate::timestamp()));
        fs::write(&path, text)?;
        self.log
            .success(format!("Diagnostics written to {}", path.display()));
        Ok(path)
    }
}
