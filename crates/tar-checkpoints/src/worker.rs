//! Background archive worker
//!
//! Owns the archive for the whole session: it is the only code that ever
//! writes to it, so appends never race.

use archive_core::{
    ArchiveMessage, ArchiveStats, ArchiverConfig, Error, JoinableReceiver, Result,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::writer::ArchiveWriter;

/// Liveness and progress of a worker, shared with enqueue handles
#[derive(Debug)]
pub struct WorkerHealth {
    /// Cleared on every exit path of the worker thread, panics included
    alive: AtomicBool,

    /// Why the worker stopped early, if it did
    failure: Mutex<Option<String>>,

    /// Counters published after each task
    stats: Mutex<ArchiveStats>,
}

impl WorkerHealth {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            failure: Mutex::new(None),
            stats: Mutex::new(ArchiveStats::default()),
        }
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Failure reason recorded by the worker
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Counters as of the last acknowledged task
    pub fn stats(&self) -> ArchiveStats {
        *self.stats.lock()
    }

    /// Reason to report when the worker is found dead
    pub fn death_reason(&self) -> String {
        self.failure()
            .unwrap_or_else(|| "archive worker exited unexpectedly".to_string())
    }

    fn record_failure(&self, reason: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(reason);
        }
    }

    fn publish(&self, stats: ArchiveStats) {
        *self.stats.lock() = stats;
    }
}

/// Marks the worker dead when the thread leaves `run`, however it leaves
struct AliveGuard(Arc<WorkerHealth>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.record_failure("archive worker panicked".to_string());
        }
        self.0.alive.store(false, Ordering::SeqCst);
    }
}

/// Handle to the background archive thread
pub struct ArchiveWorker {
    /// Thread handle, taken on stop
    handle: Option<JoinHandle<()>>,

    /// Shared liveness state
    health: Arc<WorkerHealth>,
}

impl ArchiveWorker {
    /// Start the worker thread and wait until it has opened the archive
    pub fn spawn(config: &ArchiverConfig, queue: JoinableReceiver<ArchiveMessage>) -> Result<Self> {
        let health = Arc::new(WorkerHealth::new());
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_health = Arc::clone(&health);
        let archive_path = config.archive_path.clone();
        let sync_each_task = config.sync_each_task;

        let handle = thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || run(archive_path, sync_each_task, queue, ready_tx, thread_health))
            .map_err(|e| Error::WorkerStartFailed {
                message: format!("failed to spawn archive thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                handle: Some(handle),
                health,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::WorkerStartFailed {
                    message: health.death_reason(),
                })
            }
        }
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Shared liveness state
    pub fn health(&self) -> Arc<WorkerHealth> {
        Arc::clone(&self.health)
    }

    /// Reap the worker thread
    ///
    /// Only call once the worker has acknowledged the stop message; it is
    /// idle by then and the join returns immediately.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.join().map_err(|_| Error::WorkerDead {
            reason: self.health.death_reason(),
        })?;
        debug!("Archive worker thread joined");
        Ok(())
    }
}

/// Worker thread body
fn run(
    archive_path: PathBuf,
    sync_each_task: bool,
    mut queue: JoinableReceiver<ArchiveMessage>,
    ready: mpsc::Sender<Result<()>>,
    health: Arc<WorkerHealth>,
) {
    let _alive = AliveGuard(Arc::clone(&health));

    let mut writer = match ArchiveWriter::open_append(&archive_path) {
        Ok(writer) => {
            let _ = ready.send(Ok(()));
            writer
        }
        Err(e) => {
            error!(archive = %archive_path.display(), error = %e, "Failed to open archive");
            health.record_failure(e.to_string());
            let _ = ready.send(Err(e));
            return;
        }
    };

    info!(archive = %archive_path.display(), "Archive worker started");

    loop {
        let Some(message) = queue.get() else {
            warn!("Task queue closed without a stop message, closing archive");
            if let Err(e) = writer.finish() {
                error!(error = %e, "Failed to close archive");
                health.record_failure(e.to_string());
            }
            return;
        };

        match message {
            ArchiveMessage::Stop => {
                match writer.finish() {
                    Ok(stats) => {
                        health.publish(stats);
                        info!(
                            archive = %archive_path.display(),
                            tasks = stats.tasks_archived,
                            files = stats.files_archived,
                            size_bytes = stats.bytes_archived,
                            "Archive worker stopped"
                        );
                        if let Err(e) = queue.task_done() {
                            warn!(error = %e, "Failed to acknowledge stop message");
                        }
                    }
                    Err(e) => {
                        // Stop stays unacknowledged; deactivation reports the failure
                        error!(error = %e, "Failed to close archive");
                        health.record_failure(e.to_string());
                    }
                }
                return;
            }
            ArchiveMessage::Archive(task) => {
                let epoch = task.epoch;
                let result = writer.append_task(&task).and_then(|_| {
                    if sync_each_task {
                        writer.sync()
                    } else {
                        Ok(())
                    }
                });

                if let Err(e) = result {
                    error!(epoch = epoch, error = %e, "Failed to archive task, stopping worker");
                    health.record_failure(format!("epoch {}: {}", epoch, e));
                    return;
                }

                health.publish(writer.stats());
                if let Err(e) = queue.task_done() {
                    warn!(epoch = epoch, error = %e, "Failed to acknowledge task");
                }
            }
        }
    }
}
