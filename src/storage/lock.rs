//! Exclusive advisory lock files.
//!
//! Uses `fs2` (flock on Unix, `LockFileEx` on Windows). Acquisition polls with
//! backoff and gives up at a deadline so no request waits forever.

use super::StorageError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock with [`DEFAULT_LOCK_TIMEOUT`].
    ///
    /// # Errors
    /// Returns an error if the lock file cannot be opened or the lock is still
    /// held by someone else when the timeout expires.
    pub fn acquire(path: &Path) -> Result<Self, StorageError> {
        Self::acquire_with_timeout(path, DEFAULT_LOCK_TIMEOUT)
    }

    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// # Errors
    /// Returns an error if the lock file cannot be opened or the lock is still
    /// held by someone else when the timeout expires.
    pub fn acquire_with_timeout(path: &Path, timeout: Duration) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        let mut retry_delay = INITIAL_RETRY_DELAY;

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        debug!("giving up on lock {}: {err}", path.display());
                        return Err(StorageError::LockTimeout(path.to_path_buf()));
                    }
                    std::thread::sleep(retry_delay);
                    retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                }
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The lock file itself stays on disk; removing it would race with
        // another process that already opened it.
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.lock");

        let held = FileLock::acquire(&path).unwrap();
        assert_eq!(held.path(), path);

        let second = FileLock::acquire_with_timeout(&path, Duration::from_millis(50));
        assert!(matches!(second, Err(StorageError::LockTimeout(_))));

        drop(held);
        assert!(FileLock::acquire_with_timeout(&path, Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn lock_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks/nested/uploads.lock");
        assert!(FileLock::acquire(&path).is_ok());
        assert!(path.exists());
    }
}
