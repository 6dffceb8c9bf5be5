//! Tar checkpoints: consolidate per-epoch checkpoint files into one archive
//!
//! A training loop hands freshly written files to [`TarCheckpoints`], which
//! moves them into a single tar archive on a background thread and deletes
//! the originals. [`extract`] pulls one epoch's files back out later.

pub mod controller;
pub mod extract;
pub mod worker;
pub mod writer;

pub use archive_core::{ArchiverConfig, Epoch, Error, Result};
pub use controller::{CheckpointSender, SessionSummary, TarCheckpoints};
pub use extract::{extract, extract_strict, list_epochs, EpochListing};
pub use worker::{ArchiveWorker, WorkerHealth};
pub use writer::ArchiveWriter;
