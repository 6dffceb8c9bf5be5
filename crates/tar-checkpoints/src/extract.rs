//! Read one epoch's checkpoint files back out of an archive
//!
//! Extraction never touches the queue or the worker. Read an archive only
//! when no session is appending to it.

use archive_core::{epoch_prefix, parse_entry_epoch, Epoch, Error, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Entry names grouped by epoch, each list in archive order
pub type EpochListing = BTreeMap<Epoch, Vec<String>>;

/// Extract the files archived for `epoch`
///
/// Files are written under `destination` keeping their `NNNNN/name` layout.
/// Without a destination, a directory named after the archive (file name
/// without extension) is created in the current directory. Returns the
/// epoch's directory; when the archive holds nothing for `epoch` that
/// directory is created empty.
pub fn extract(
    archive_path: impl AsRef<Path>,
    epoch: Epoch,
    destination: Option<&Path>,
) -> Result<PathBuf> {
    let archive_path = archive_path.as_ref();
    let (epoch_dir, extracted) = extract_members(archive_path, epoch, destination)?;

    if extracted == 0 {
        warn!(
            archive = %archive_path.display(),
            epoch = epoch,
            "No archived files for epoch, returning an empty directory"
        );
    }

    Ok(epoch_dir)
}

/// Like [`extract`], but fails with `EpochNotFound` when nothing matches
pub fn extract_strict(
    archive_path: impl AsRef<Path>,
    epoch: Epoch,
    destination: Option<&Path>,
) -> Result<PathBuf> {
    let archive_path = archive_path.as_ref();
    let (epoch_dir, extracted) = extract_members(archive_path, epoch, destination)?;

    if extracted == 0 {
        return Err(Error::EpochNotFound {
            epoch,
            archive: archive_path.to_path_buf(),
        });
    }

    Ok(epoch_dir)
}

/// List archived entries grouped by epoch
///
/// Entries outside the `NNNNN/name` layout are skipped.
pub fn list_epochs(archive_path: impl AsRef<Path>) -> Result<EpochListing> {
    let archive_path = archive_path.as_ref();
    let mut archive = open_archive(archive_path)?;
    let mut listing = EpochListing::new();

    for entry in archive
        .entries_with_seek()
        .map_err(|e| Error::archive(archive_path, e))?
    {
        let entry = entry.map_err(|e| Error::archive(archive_path, e))?;
        let name = entry
            .path()
            .map_err(|e| Error::archive(archive_path, e))?
            .to_string_lossy()
            .into_owned();

        match parse_entry_epoch(&name) {
            Some(epoch) => listing.entry(epoch).or_default().push(name),
            None => debug!(entry = %name, "Skipping entry outside the epoch layout"),
        }
    }

    Ok(listing)
}

/// Default extraction directory: the archive's file name without extension
pub fn default_destination(archive_path: &Path) -> Result<PathBuf> {
    archive_path
        .file_stem()
        .map(PathBuf::from)
        .ok_or_else(|| Error::archive(archive_path, "archive path has no file name"))
}

fn open_archive(archive_path: &Path) -> Result<tar::Archive<File>> {
    let file = File::open(archive_path).map_err(|e| Error::archive(archive_path, e))?;
    Ok(tar::Archive::new(file))
}

/// Unpack the epoch's members, returning its directory and the number of files written
fn extract_members(
    archive_path: &Path,
    epoch: Epoch,
    destination: Option<&Path>,
) -> Result<(PathBuf, usize)> {
    let destination = match destination {
        Some(dir) => dir.to_path_buf(),
        None => default_destination(archive_path)?,
    };
    let prefix = epoch_prefix(epoch);

    let mut archive = open_archive(archive_path)?;
    fs::create_dir_all(&destination)?;

    let mut extracted = 0;
    for entry in archive
        .entries()
        .map_err(|e| Error::archive(archive_path, e))?
    {
        let mut entry = entry.map_err(|e| Error::archive(archive_path, e))?;
        let name = entry
            .path()
            .map_err(|e| Error::archive(archive_path, e))?
            .to_string_lossy()
            .into_owned();

        if !name.starts_with(&prefix) {
            continue;
        }

        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(&destination)
            .map_err(|e| Error::archive(archive_path, e))?;

        if !unpacked {
            warn!(entry = %name, "Skipped entry that would escape the destination");
        } else if is_file {
            debug!(entry = %name, "Extracted file");
            extracted += 1;
        }
    }

    let epoch_dir = destination.join(prefix.trim_end_matches('/'));
    fs::create_dir_all(&epoch_dir)?;

    info!(
        archive = %archive_path.display(),
        epoch = epoch,
        files = extracted,
        destination = %epoch_dir.display(),
        "Epoch extracted"
    );

    Ok((epoch_dir, extracted))
}
