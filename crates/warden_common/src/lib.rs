//! Shared library for warden, a single-host provisioning and hardening tool.
//!
//! Core pieces:
//! - `sequencer`: ordered, idempotent phases behind a pre-flight gate
//! - `backup`: file/directory backups, snapshots and emergency rollback
//! - `emergency`: degraded-host assessment and recovery actions
//! - `compliance`: framework scoring with persisted reports
//!
//! Host access goes through `system::SystemCollaborator`.

pub mod backup;
pub mod compliance;
pub mod config;
pub mod emergency;
pub mod error;
pub mod logging;
pub mod parsers;
pub mod phases;
pub mod prompt;
pub mod sequencer;
pub mod system;

pub use config::{OnFailure, ScanMode, WardenConfig};
pub use error::{Result, WardenError};
pub use logging::{LogEntry, LogLevel, StatusLog};
pub use prompt::{AutoPrompt, FailureDecision, OperatorPrompt, ScriptedPrompt};
pub use system::{CommandOutput, FakeSystem, HostSystem, SystemCollaborator};

/// Version recorded in snapshot metadata and reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Timestamp format shared by backups, snapshots and report files
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Current local time in `TIMESTAMP_FORMAT`
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
