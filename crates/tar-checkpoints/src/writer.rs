//! Append-mode tar archive writer

use archive_core::{entry_name, ArchiveStats, ArchiveTask, Epoch, Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Size of a tar block; member data is padded to a multiple of it
const BLOCK_SIZE: u64 = 512;

/// Tar archive opened for appending
///
/// Existing members are kept; new members are written after the last one.
/// Dropping the writer without calling [`finish`](Self::finish) still writes
/// the end-of-archive blocks.
pub struct ArchiveWriter {
    /// Archive location
    path: PathBuf,

    /// Tar builder over the open archive file
    builder: tar::Builder<File>,

    /// Counters since open
    stats: ArchiveStats,
}

impl ArchiveWriter {
    /// Open `path` for appending, creating it (and its parent directory) if missing
    pub fn open_append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::archive(path, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::archive(path, e))?;

        // Drop the old end-of-archive blocks so new members follow the last one
        let end = Self::end_of_members(&mut file, path)?;
        file.set_len(end).map_err(|e| Error::archive(path, e))?;
        file.seek(SeekFrom::Start(end))
            .map_err(|e| Error::archive(path, e))?;

        info!(
            archive = %path.display(),
            resume_offset = end,
            "Opened archive for appending"
        );

        Ok(Self {
            path: path.to_path_buf(),
            builder: tar::Builder::new(file),
            stats: ArchiveStats::default(),
        })
    }

    /// Offset right after the last member's padded data
    fn end_of_members(file: &mut File, path: &Path) -> Result<u64> {
        let len = file.metadata().map_err(|e| Error::archive(path, e))?.len();
        if len == 0 {
            return Ok(0);
        }

        let mut archive = tar::Archive::new(&mut *file);
        let mut end = 0;
        for entry in archive
            .entries_with_seek()
            .map_err(|e| Error::archive(path, e))?
        {
            let entry = entry.map_err(|e| Error::archive(path, e))?;
            let size = entry
                .header()
                .entry_size()
                .map_err(|e| Error::archive(path, e))?;
            end = entry.raw_file_position() + size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        }

        Ok(end)
    }

    /// Archive location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counters since open
    pub fn stats(&self) -> ArchiveStats {
        self.stats
    }

    /// Append one file under its epoch entry name, then delete the source
    pub fn append_file(&mut self, epoch: Epoch, source: &Path) -> Result<u64> {
        let name = entry_name(epoch, source)?;
        let size = fs::metadata(source)
            .map_err(|e| Error::Archive {
                path: self.path.clone(),
                message: format!("cannot read {}: {}", source.display(), e),
            })?
            .len();

        self.builder
            .append_path_with_name(source, &name)
            .map_err(|e| Error::Archive {
                path: self.path.clone(),
                message: format!("failed to append {}: {}", source.display(), e),
            })?;
        fs::remove_file(source).map_err(|e| Error::Archive {
            path: self.path.clone(),
            message: format!("archived {} but failed to remove it: {}", source.display(), e),
        })?;

        debug!(
            source = %source.display(),
            entry = %name.display(),
            size_bytes = size,
            "Moved file into archive"
        );

        self.stats.files_archived += 1;
        self.stats.bytes_archived += size;
        Ok(size)
    }

    /// Append every file of a task in list order
    #[instrument(skip(self, task), fields(epoch = task.epoch, files = task.files.len()))]
    pub fn append_task(&mut self, task: &ArchiveTask) -> Result<u64> {
        let start = std::time::Instant::now();
        let mut bytes = 0;

        for file in &task.files {
            bytes += self.append_file(task.epoch, file)?;
        }
        self.stats.tasks_archived += 1;

        debug!(
            size_bytes = bytes,
            elapsed_ms = start.elapsed().as_millis(),
            "Task archived"
        );

        Ok(bytes)
    }

    /// Flush appended data to disk
    pub fn sync(&mut self) -> Result<()> {
        let path = self.path.clone();
        self.builder
            .get_mut()
            .sync_data()
            .map_err(|e| Error::archive(path, e))
    }

    /// Write the end-of-archive blocks and close the file
    pub fn finish(self) -> Result<ArchiveStats> {
        let Self {
            path,
            builder,
            stats,
        } = self;

        let file = builder
            .into_inner()
            .map_err(|e| Error::archive(&path, e))?;
        file.sync_all().map_err(|e| Error::archive(&path, e))?;

        Ok(stats)
    }
}
