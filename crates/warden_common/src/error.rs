//! Error types for Warden.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    #[error("Phase '{phase}' failed: {message}")]
    Phase { phase: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("No snapshot found under {0}")]
    NoSnapshot(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Cancelled by operator: {0}")]
    Cancelled(String),

    #[error("Another warden run is in progress (lock held: {0})")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl WardenError {
    /// Process exit code for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            WardenError::Preflight(_) => 2,
            WardenError::Phase { .. } => 3,
            WardenError::NoSnapshot(_) => 4,
            WardenError::Cancelled(_) => 5,
            WardenError::Lock(_) => 6,
            WardenError::Config(_) | WardenError::Toml(_) => 78,
            _ => 1,
        }
    }

    pub fn backup(message: impl Into<String>) -> Self {
        WardenError::Backup(message.into())
    }

    pub fn restore(message: impl Into<String>) -> Self {
        WardenError::Restore(message.into())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
