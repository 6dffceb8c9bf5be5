//! Error types for checkpoint archiving

use std::path::PathBuf;

use thiserror::Error;

use crate::Epoch;

/// Result type alias using the archiving Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for checkpoint archiving
#[derive(Error, Debug)]
pub enum Error {
    // Session usage errors
    #[error("Archiving session is not active: enqueue is only valid between activate and deactivate")]
    NotActive,

    #[error("Archiving session is already active for {}", .path.display())]
    AlreadyActive { path: PathBuf },

    #[error("Invalid archive task: {message}")]
    InvalidTask { message: String },

    #[error("Source file not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    // Worker errors
    #[error("Archive worker is not alive: {reason}")]
    WorkerDead { reason: String },

    #[error("Archive worker failed to start: {message}")]
    WorkerStartFailed { message: String },

    #[error("Inconsistent archiving state: {reason}")]
    InconsistentState { reason: String },

    #[error("Drain timeout after {timeout_ms}ms with {outstanding} task(s) outstanding")]
    DrainTimeout { timeout_ms: u64, outstanding: usize },

    // Queue errors
    #[error("Task queue is closed")]
    QueueClosed,

    #[error("task_done() called more times than items were put")]
    TaskDoneOverflow,

    // Archive errors
    #[error("Archive error in {}: {message}", .path.display())]
    Archive { path: PathBuf, message: String },

    #[error("Epoch {epoch} not found in archive {}", .archive.display())]
    EpochNotFound { epoch: Epoch, archive: PathBuf },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true if the archiving pipeline is unrecoverable for this session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WorkerDead { .. }
                | Error::WorkerStartFailed { .. }
                | Error::InconsistentState { .. }
                | Error::DrainTimeout { .. }
                | Error::Archive { .. }
        )
    }

    /// Returns true if the caller misused the API
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::NotActive
                | Error::AlreadyActive { .. }
                | Error::InvalidTask { .. }
                | Error::SourceNotFound { .. }
                | Error::QueueClosed
        )
    }

    /// Wrap an I/O failure on the archive container
    pub fn archive(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::Archive {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
