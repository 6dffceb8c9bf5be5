//! Archive Core - Foundation for asynchronous checkpoint archiving
//!
//! Provides the shared task types, error handling, configuration and the
//! joinable task queue used between the caller and the archive worker.

pub mod config;
pub mod error;
pub mod queue;
pub mod types;

pub use config::ArchiverConfig;
pub use error::{Error, Result};
pub use queue::{joinable_queue, JoinOutcome, JoinableReceiver, JoinableSender};
pub use types::*;
