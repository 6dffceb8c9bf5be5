//! Session controller for background checkpoint archiving

use archive_core::{
    joinable_queue, ArchiveMessage, ArchiveStats, ArchiveTask, ArchiverConfig, Epoch, Error,
    JoinOutcome, JoinableSender, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::worker::{ArchiveWorker, WorkerHealth};

/// Summary of a finished archiving session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier, also attached to the session's log lines
    pub session_id: Uuid,

    /// Archive the session appended to
    pub archive_path: PathBuf,

    /// Work done by the worker
    pub stats: ArchiveStats,

    /// When the worker was started
    pub started_at: DateTime<Utc>,

    /// When the worker was stopped
    pub finished_at: DateTime<Utc>,
}

/// Enqueue handle returned by [`TarCheckpoints::activate`]
///
/// Cheap to clone. Every call returns as soon as the task is queued.
#[derive(Clone)]
pub struct CheckpointSender {
    queue: JoinableSender<ArchiveMessage>,
    health: Arc<WorkerHealth>,
}

impl CheckpointSender {
    /// Queue `files` to be moved into the archive under `epoch`
    ///
    /// Inside the archive each file is named `{epoch:05}/{basename}`.
    pub fn enqueue<I, P>(&self, epoch: Epoch, files: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        if self.queue.is_closed() {
            return Err(Error::NotActive);
        }
        if !self.health.is_alive() {
            return Err(Error::WorkerDead {
                reason: self.health.death_reason(),
            });
        }

        let task = ArchiveTask::new(epoch, files)?;
        let count = task.files.len();

        self.queue
            .put(ArchiveMessage::Archive(task))
            .map_err(|e| match e {
                Error::QueueClosed => Error::NotActive,
                other => other,
            })?;

        debug!(epoch = epoch, files = count, "Queued files for archiving");
        Ok(())
    }

    /// Tasks queued but not yet archived
    pub fn pending(&self) -> usize {
        self.queue.unfinished()
    }

    /// Whether the archive worker is still running
    pub fn is_worker_alive(&self) -> bool {
        self.health.is_alive()
    }
}

struct Session {
    id: Uuid,
    sender: CheckpointSender,
    worker: ArchiveWorker,
    started_at: DateTime<Utc>,
}

/// Moves checkpoint files into a single tar archive on a background thread
///
/// ```no_run
/// use tar_checkpoints::TarCheckpoints;
///
/// # fn main() -> archive_core::Result<()> {
/// let mut archiver = TarCheckpoints::new("run.tar");
/// let sender = archiver.activate()?;
/// for epoch in 0..10 {
///     let path = format!("epoch_{epoch}.ckpt");
///     std::fs::write(&path, b"weights")?;
///     sender.enqueue(epoch, [path])?;
/// }
/// // Blocks until every queued file is in the archive
/// archiver.deactivate()?;
/// # Ok(())
/// # }
/// ```
pub struct TarCheckpoints {
    /// Configuration
    config: ArchiverConfig,

    /// Active session, if any
    session: Option<Session>,
}

impl TarCheckpoints {
    /// Archiver with default settings writing to `archive_path`
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self::with_config(ArchiverConfig::new(archive_path))
    }

    /// Archiver with explicit configuration
    pub fn with_config(config: ArchiverConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Archive this controller writes to
    pub fn archive_path(&self) -> &Path {
        &self.config.archive_path
    }

    /// Whether a session is running
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the current session's worker is running
    pub fn is_worker_alive(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.worker.is_alive())
    }

    /// Start the archive worker and return an enqueue handle
    pub fn activate(&mut self) -> Result<CheckpointSender> {
        if self.session.is_some() {
            return Err(Error::AlreadyActive {
                path: self.config.archive_path.clone(),
            });
        }
        self.config.validate()?;

        let (queue, consumer) = joinable_queue();
        let worker = ArchiveWorker::spawn(&self.config, consumer)?;
        let sender = CheckpointSender {
            queue,
            health: worker.health(),
        };

        let id = Uuid::new_v4();
        info!(
            session_id = %id,
            archive = %self.config.archive_path.display(),
            "Tar checkpoint session started"
        );

        self.session = Some(Session {
            id,
            sender: sender.clone(),
            worker,
            started_at: Utc::now(),
        });

        Ok(sender)
    }

    /// Queue files for archiving through the active session
    pub fn enqueue<I, P>(&self, epoch: Epoch, files: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.session
            .as_ref()
            .ok_or(Error::NotActive)?
            .sender
            .enqueue(epoch, files)
    }

    /// Drain the queue and stop the worker
    ///
    /// Blocks until every task queued before this call is in the archive.
    /// Returns `Ok(None)` when no session is active.
    pub fn deactivate(&mut self) -> Result<Option<SessionSummary>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };

        let queue = &session.sender.queue;
        let health = session.worker.health();
        debug!(
            session_id = %session.id,
            pending = queue.unfinished(),
            "Finishing tar checkpoint session"
        );

        let stop_queued = queue.put_final(ArchiveMessage::Stop);

        if session.worker.is_alive() && stop_queued.is_ok() {
            match queue.join_timeout(self.config.drain_timeout) {
                JoinOutcome::Drained => {}
                JoinOutcome::ConsumerGone { outstanding } => {
                    return Err(inconsistent(&health, outstanding));
                }
                JoinOutcome::TimedOut { outstanding } => {
                    let timeout_ms = self
                        .config
                        .drain_timeout
                        .map(|t| t.as_millis() as u64)
                        .unwrap_or_default();
                    warn!(
                        session_id = %session.id,
                        outstanding = outstanding,
                        timeout_ms = timeout_ms,
                        "Archive worker did not drain in time, detaching it"
                    );
                    return Err(Error::DrainTimeout {
                        timeout_ms,
                        outstanding,
                    });
                }
            }
        } else {
            // The worker may have consumed the stop message already; anything
            // else means it died with work left.
            let outstanding = queue.unfinished();
            if stop_queued.is_err() || outstanding > 0 || health.failure().is_some() {
                return Err(inconsistent(&health, outstanding));
            }
        }

        session.worker.stop()?;

        let summary = SessionSummary {
            session_id: session.id,
            archive_path: self.config.archive_path.clone(),
            stats: health.stats(),
            started_at: session.started_at,
            finished_at: Utc::now(),
        };

        info!(
            session_id = %summary.session_id,
            archive = %summary.archive_path.display(),
            tasks = summary.stats.tasks_archived,
            files = summary.stats.files_archived,
            size_bytes = summary.stats.bytes_archived,
            "Tar checkpoint session finished"
        );

        Ok(Some(summary))
    }

    /// Run `body` inside a session, deactivating on every exit path
    ///
    /// An error from `body` takes precedence over a deactivation error,
    /// which is then logged. A panic in `body` still deactivates through
    /// `Drop`.
    pub fn scope<T, E, F>(config: ArchiverConfig, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&CheckpointSender) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut archiver = Self::with_config(config);
        let sender = archiver.activate()?;

        match body(&sender) {
            Ok(value) => {
                archiver.deactivate()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(deactivate_err) = archiver.deactivate() {
                    error!(
                        error = %deactivate_err,
                        "Failed to deactivate tar checkpoint session after an error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Deactivate on Tokio's blocking pool, for async training loops
    pub async fn finish_async(self) -> Result<Option<SessionSummary>> {
        let mut archiver = self;
        tokio::task::spawn_blocking(move || archiver.deactivate())
            .await
            .map_err(|e| Error::InconsistentState {
                reason: format!("deactivation task failed: {}", e),
            })?
    }
}

impl Drop for TarCheckpoints {
    fn drop(&mut self) {
        if self.session.is_none() {
            return;
        }
        if let Err(e) = self.deactivate() {
            error!(
                archive = %self.config.archive_path.display(),
                error = %e,
                "Tar checkpoint session did not shut down cleanly"
            );
        }
    }
}

fn inconsistent(health: &WorkerHealth, outstanding: usize) -> Error {
    Error::InconsistentState {
        reason: format!(
            "archive worker is gone with {} task(s) unacknowledged: {}",
            outstanding,
            health.death_reason()
        ),
    }
}
