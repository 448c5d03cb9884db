//! Replica directory management.
//!
//! A file-backed replica lives in one directory:
//!
//! ```text
//! <replica_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ journal.log       # Committed generations
//! └─ CHECKPOINTS       # Sync checkpoints per target
//! ```
//!
//! The LOCK file ensures only one process can write to the replica at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const CHECKPOINTS_FILE: &str = "CHECKPOINTS";

/// Holds the exclusive lock on a replica directory.
#[derive(Debug)]
pub struct ReplicaDir {
    path: PathBuf,
    _lock_file: File,
}

impl ReplicaDir {
    /// Opens or creates a replica directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - It already holds a journal and `error_if_exists` is true
    /// - Another process holds the lock (returns `ReplicaLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool, error_if_exists: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "replica directory does not exist: {}",
                    path.display()
                )));
            }
        } else if error_if_exists && path.join(JOURNAL_FILE).exists() {
            return Err(CoreError::invalid_format(format!(
                "replica already exists: {}",
                path.display()
            )));
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::ReplicaLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the replica directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Returns the path to the checkpoint table.
    #[must_use]
    pub fn checkpoints_path(&self) -> PathBuf {
        checkpoints_path(&self.path)
    }
}

/// Path of the checkpoint table inside a replica directory.
pub fn checkpoints_path(replica_dir: &Path) -> PathBuf {
    replica_dir.join(CHECKPOINTS_FILE)
}

/// Replaces `path` with `data` so that a crash leaves either the old or the
/// new contents, never a mix.
///
/// Writes a sibling temp file, syncs it, renames it over `path` and then
/// syncs the parent directory so the rename itself is durable.
pub fn write_atomically(path: &Path, data: &[u8]) -> CoreResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CoreError::invalid_format(format!("no parent: {}", path.display())))?;
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_directory(parent)
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced.
    Ok(())
}
