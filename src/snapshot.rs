//! Locating the newest dataset snapshot on disk.
//!
//! Snapshots are plain files in a reports directory, or folders of files
//! dropped into a delivery directory. "Newest" is decided by filesystem
//! timestamps; ties fall back to the entry name so the choice is stable.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::error::SnapshotError;

/// Which timestamp orders directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Modified,
    /// Creation time, or modification time where the platform does not record it.
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Folder,
}

fn read_error(dir: &Path) -> impl Fn(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: dir.to_path_buf(),
        source,
    }
}

/// Non-hidden entries of one kind with their timestamp.
fn entries(
    dir: &Path,
    kind: EntryKind,
    timestamp: Timestamp,
) -> Result<Vec<(PathBuf, SystemTime)>, SnapshotError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error(dir))? {
        let entry = entry.map_err(read_error(dir))?;
        let path = entry.path();

        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let matches_kind = match kind {
            EntryKind::File => path.is_file(),
            EntryKind::Folder => path.is_dir(),
        };
        if !matches_kind {
            continue;
        }

        let metadata = fs::metadata(&path).map_err(read_error(dir))?;
        let time = match timestamp {
            Timestamp::Modified => metadata.modified(),
            Timestamp::Created => metadata.created().or_else(|_| metadata.modified()),
        }
        .map_err(read_error(dir))?;
        found.push((path, time));
    }
    Ok(found)
}

fn newest(mut found: Vec<(PathBuf, SystemTime)>) -> Option<PathBuf> {
    found.sort_by(|(a_path, a_time), (b_path, b_time)| {
        b_time.cmp(a_time).then_with(|| b_path.cmp(a_path))
    });
    found.into_iter().next().map(|(path, _)| path)
}

fn has_extension(path: &Path, extension: Option<&str>) -> bool {
    match extension {
        None => true,
        Some(wanted) => path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(wanted.trim_start_matches('.'))),
    }
}

/// Most recently modified file directly inside `dir`.
pub fn newest_file(dir: &Path) -> Result<Option<PathBuf>, SnapshotError> {
    newest_file_with_extension(dir, None)
}

/// Most recently modified file inside `dir` with the given extension.
pub fn newest_file_with_extension(
    dir: &Path,
    extension: Option<&str>,
) -> Result<Option<PathBuf>, SnapshotError> {
    debug!("Looking for the newest file in {}", dir.display());
    let files: Vec<_> = entries(dir, EntryKind::File, Timestamp::Modified)?
        .into_iter()
        .filter(|(path, _)| has_extension(path, extension))
        .collect();
    if files.is_empty() {
        info!("No files found in {}", dir.display());
        return Ok(None);
    }
    let latest = newest(files);
    if let Some(path) = &latest {
        info!("Newest file: {}", path.display());
    }
    Ok(latest)
}

/// Newest sub-folder of `dir` by creation time.
pub fn newest_folder(dir: &Path) -> Result<Option<PathBuf>, SnapshotError> {
    newest_folder_by(dir, Timestamp::Created)
}

pub fn newest_folder_by(dir: &Path, timestamp: Timestamp) -> Result<Option<PathBuf>, SnapshotError> {
    let folders = entries(dir, EntryKind::Folder, timestamp)?;
    if folders.is_empty() {
        info!("No folders found in {}", dir.display());
        return Ok(None);
    }
    Ok(newest(folders))
}

/// Newest matching dataset inside the newest folder of `dir`.
pub fn newest_folder_file(dir: &Path, extension: Option<&str>) -> Result<PathBuf, SnapshotError> {
    newest_folder_file_by(dir, extension, Timestamp::Created)
}

pub fn newest_folder_file_by(
    dir: &Path,
    extension: Option<&str>,
    folder_timestamp: Timestamp,
) -> Result<PathBuf, SnapshotError> {
    info!("Getting newest data within folders of {}", dir.display());
    let folder =
        newest_folder_by(dir, folder_timestamp)?.ok_or_else(|| SnapshotError::NoFolders(dir.to_path_buf()))?;
    debug!("Newest data folder: {}", folder.display());
    let file = newest_file_with_extension(&folder, extension)?
        .ok_or_else(|| SnapshotError::NoFiles(folder.clone()))?;
    info!("Newest data: {}", file.display());
    Ok(file)
}
