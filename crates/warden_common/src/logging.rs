//! Status logging
//!
//! Every action writes status lines at five levels (DEBUG, INFO, SUCCESS,
//! WARNING, ERROR). Each line is:
//! - printed to the console with a colored tag (ERROR also on stderr)
//! - appended as one JSONL entry to an append-only log file
//! - mirrored as a `tracing` event for diagnostics

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Status line level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    fn tag(&self) -> String {
        match self {
            LogLevel::Debug => "[DEBUG]".dimmed().to_string(),
            LogLevel::Info => "[INFO]".cyan().to_string(),
            LogLevel::Success => "[ OK ]".bright_green().to_string(),
            LogLevel::Warning => "[WARN]".yellow().to_string(),
            LogLevel::Error => "[FAIL]".bright_red().to_string(),
        }
    }
}

/// A structured log entry (JSONL format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.into(),
        }
    }

    /// Serialize to JSONL (single line JSON)
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"timestamp":"{}","level":"{}","message":"serialization_error"}}"#,
                self.timestamp.to_rfc3339(),
                self.level.as_str()
            )
        })
    }
}

enum Sink {
    File(PathBuf),
    Memory(RefCell<Vec<LogEntry>>),
}

/// Shared append-only status log handed to phases and recovery actions.
pub struct StatusLog {
    component: String,
    sink: Sink,
    console: bool,
    verbose: bool,
    errors: Cell<usize>,
    warnings: Cell<usize>,
}

impl StatusLog {
    /// Log to `path` (parent directories are created on first write) and the console.
    pub fn to_file(component: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            component: component.to_string(),
            sink: Sink::File(path.into()),
            console: true,
            verbose: false,
            errors: Cell::new(0),
            warnings: Cell::new(0),
        }
    }

    /// Keep entries in memory without console output.
    pub fn memory(component: &str) -> Self {
        Self {
            component: component.to_string(),
            sink: Sink::Memory(RefCell::new(Vec::new())),
            console: false,
            verbose: false,
            errors: Cell::new(0),
            warnings: Cell::new(0),
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Component label written with each entry.
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File(path) => Some(path),
            Sink::Memory(_) => None,
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Info, message.as_ref());
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Success, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Warning, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(LogLevel::Error, message.as_ref());
    }

    pub fn error_count(&self) -> usize {
        self.errors.get()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.get()
    }

    /// Entries captured by a memory log (empty for file logs).
    pub fn entries(&self) -> Vec<LogEntry> {
        match &self.sink {
            Sink::Memory(entries) => entries.borrow().clone(),
            Sink::File(_) => Vec::new(),
        }
    }

    /// True if a memory log holds a line at `level` containing `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => self.errors.set(self.errors.get() + 1),
            LogLevel::Warning => self.warnings.set(self.warnings.get() + 1),
            _ => {}
        }

        match level {
            LogLevel::Debug => tracing::debug!(component = %self.component, "{}", message),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(component = %self.component, "{}", message)
            }
            LogLevel::Warning => tracing::warn!(component = %self.component, "{}", message),
            LogLevel::Error => tracing::error!(component = %self.component, "{}", message),
        }

        if self.console && (level != LogLevel::Debug || self.verbose) {
            let line = format!("{} {}", level.tag(), message);
            if level == LogLevel::Error {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }

        let entry = LogEntry::new(level, &self.component, message);
        match &self.sink {
            Sink::Memory(entries) => entries.borrow_mut().push(entry),
            Sink::File(path) => {
                if let Err(e) = append_line(path, &entry.to_jsonl()) {
                    tracing::warn!("Could not append to {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_entry_to_jsonl() {
        let entry = LogEntry::new(LogLevel::Success, "sequencer", "Phase complete");
        let jsonl = entry.to_jsonl();
        assert!(jsonl.contains("\"level\":\"success\""));
        assert!(jsonl.contains("\"component\":\"sequencer\""));
        assert!(!jsonl.contains('\n'));
    }

    #[test]
    fn test_memory_log_counts_errors() {
        let log = StatusLog::memory("test");
        log.info("starting");
        log.warning("careful");
        log.error("broken");
        log.error("still broken");

        assert_eq!(log.error_count(), 2);
        assert_eq!(log.warning_count(), 1);
        assert_eq!(log.entries().len(), 4);
        assert!(log.contains(LogLevel::Error, "still"));
        assert!(!log.contains(LogLevel::Info, "broken"));
    }

    #[test]
    fn test_file_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/warden.log");
        let log = StatusLog::to_file("test", &path).with_console(false);

        log.info("one");
        log.debug("two");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: LogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry.level, LogLevel::Debug);
        assert_eq!(entry.message, "two");
    }
}
