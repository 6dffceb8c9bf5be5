//! Core type definitions for checkpoint archiving

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Training epoch counter
pub type Epoch = u64;

/// Width of the zero-padded epoch directory inside the archive
pub const EPOCH_WIDTH: usize = 5;

/// Directory prefix for an epoch inside the archive, e.g. `00042/`
pub fn epoch_prefix(epoch: Epoch) -> String {
    format!("{:0width$}/", epoch, width = EPOCH_WIDTH)
}

/// Archive entry name for a source file archived under `epoch`
///
/// Only the basename of `source` is kept, so two files with the same
/// basename land in different entries as long as their epochs differ.
pub fn entry_name(epoch: Epoch, source: &Path) -> Result<PathBuf> {
    let basename = source.file_name().ok_or_else(|| Error::InvalidTask {
        message: format!("{} has no file name", source.display()),
    })?;
    Ok(PathBuf::from(format!("{:0width$}", epoch, width = EPOCH_WIDTH)).join(basename))
}

/// Parse the epoch out of an archive entry name, if it follows the `NNNNN/name` layout
pub fn parse_entry_epoch(name: &str) -> Option<Epoch> {
    let (dir, rest) = name.split_once('/')?;
    if dir.len() < EPOCH_WIDTH || rest.is_empty() || !dir.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    dir.parse().ok()
}

/// A batch of checkpoint files submitted for one epoch
///
/// The file order is the order of entries in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveTask {
    /// Epoch the files belong to
    pub epoch: Epoch,

    /// Source files, in archive order
    pub files: Vec<PathBuf>,
}

impl ArchiveTask {
    /// Build a task, checking that every file exists and that basenames are unique
    pub fn new<I, P>(epoch: Epoch, files: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let files: Vec<PathBuf> = files.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(files.len());

        for file in &files {
            let name = entry_name(epoch, file)?;
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidTask {
                    message: format!(
                        "duplicate entry {} in epoch {}",
                        name.display(),
                        epoch
                    ),
                });
            }

            match std::fs::metadata(file) {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => {
                    return Err(Error::InvalidTask {
                        message: format!("{} is not a regular file", file.display()),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::SourceNotFound { path: file.clone() })
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(Self { epoch, files })
    }

    /// Entry names this task will produce, in order
    pub fn entry_names(&self) -> Result<Vec<PathBuf>> {
        self.files
            .iter()
            .map(|f| entry_name(self.epoch, f))
            .collect()
    }
}

/// Message carried by the archive queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveMessage {
    /// Append these files to the archive
    Archive(ArchiveTask),

    /// Sentinel: close the archive and stop
    Stop,
}

/// Counters for one archiving session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStats {
    /// Tasks fully appended and acknowledged
    pub tasks_archived: u64,

    /// Files appended and removed from disk
    pub files_archived: u64,

    /// Bytes of file content appended
    pub bytes_archived: u64,
}
