//! Cross-process advisory file locks.
//!
//! The signal spool and the reply journal are shared between the daemon and
//! the `signal` / `delete-entry` CLI invocations, which run as separate
//! processes. An in-process mutex cannot cover that, so mutations hold an
//! exclusive flock on a sidecar lock file for the whole read-modify-rewrite.

use crate::error::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a shared file, released on drop.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until the exclusive lock for `path` is acquired.
    ///
    /// Locks go through a sidecar file rather than `path` itself, so the
    /// locked file can be renamed or truncated while held.
    pub fn acquire(path: &Path) -> Result<FileLock> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Sidecar lock path: `signals.jsonl` locks through `signals.jsonl.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_path = path.to_path_buf();
    match lock_path.extension() {
        Some(ext) => {
            let ext = format!("{}.lock", ext.to_string_lossy());
            lock_path.set_extension(ext);
        }
        None => {
            lock_path.set_extension("lock");
        }
    }
    lock_path
}
