// Exclusive ownership of the checkpoint and data directories
//
// Each directory gets an `in_use.lock` file holding an advisory exclusive
// lock and the owner's PID. A second channel pointed at any of the same
// directories fails to start, whether it lives in this process or another.

use fs2::FileExt;
use spillway_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name placed in every locked directory
pub const LOCK_FILE: &str = "in_use.lock";

/// Held locks on a set of directories; released on drop
#[derive(Debug)]
pub struct DirectoryLock {
    files: Vec<(PathBuf, File)>,
}

impl DirectoryLock {
    /// Lock every directory, or none of them.
    ///
    /// Directories listed more than once are locked once.
    pub fn acquire<P: AsRef<Path>>(dirs: &[P]) -> Result<Self> {
        let mut unique: Vec<PathBuf> = Vec::new();
        for dir in dirs {
            let dir = dir.as_ref();
            let key = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        let mut lock = Self { files: Vec::new() };
        for dir in unique {
            // an early return drops `lock`, releasing what was taken so far
            let path = dir.join(LOCK_FILE);
            let file = Self::lock_one(&path)?;
            lock.files.push((path, file));
        }

        debug!(dirs = lock.files.len(), "directories locked");
        Ok(lock)
    }

    fn lock_one(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive().map_err(|e| {
            Error::LockContention(format!(
                "{} is locked by another channel: {}",
                path.display(),
                e
            ))
        })?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(file)
    }

    /// Paths of the held lock files
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(path, _)| path.as_path())
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        for (path, file) in &self.files {
            if let Err(e) = FileExt::unlock(file) {
                warn!(path = %path.display(), error = %e, "failed to release directory lock");
            }
        }
    }
}
