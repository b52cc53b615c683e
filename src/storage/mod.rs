//! Flat-file persistence helpers.
//!
//! Records are small JSON documents. Reads never fail: a missing or malformed
//! file yields the type's default. Writes go through a temp file and a rename
//! so readers never observe a half-written document, and read-modify-write
//! cycles run under an exclusive lock file next to the record.

mod lock;

pub use lock::{FileLock, DEFAULT_LOCK_TIMEOUT};

use serde::{de::DeserializeOwned, Serialize};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("timed out waiting for lock {}", .0.display())]
    LockTimeout(PathBuf),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Lock file guarding `path`, e.g. `data/allowed_ips.json.lock`.
#[must_use]
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// Read a JSON record, falling back to `T::default()` when the file is
/// missing or does not match the schema.
#[must_use]
pub fn read_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            warn!("Failed to read {}: {err}", path.display());
            return T::default();
        }
    };

    serde_json::from_slice(&contents).unwrap_or_else(|err| {
        warn!("Ignoring malformed record {}: {err}", path.display());
        T::default()
    })
}

/// Replace `path` with `bytes` via a sibling temp file and a rename.
///
/// # Errors
/// Returns an error if the temp file cannot be written or renamed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.{}.tmp", Ulid::new()));

    let result = std::fs::File::create(&temp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&temp, path));

    if let Err(err) = result {
        let _ = std::fs::remove_file(&temp);
        return Err(io_err(err));
    }

    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

/// Locked read-modify-write of a JSON record.
///
/// `apply` returns the caller's result and whether the record changed; the
/// file is only rewritten when it did.
///
/// # Errors
/// Returns an error if the lock cannot be taken or the write fails.
pub fn update_json<T, R, F>(path: &Path, apply: F) -> Result<R, StorageError>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnOnce(&mut T) -> (R, bool),
{
    let _lock = FileLock::acquire(&lock_path(path))?;
    let mut record: T = read_json_or_default(path);
    let (result, changed) = apply(&mut record);
    if changed {
        write_json_atomic(path, &record)?;
    }
    Ok(result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Counter {
        value: u32,
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/data/allowed_ips.json")),
            PathBuf::from("/data/allowed_ips.json.lock")
        );
    }

    #[test]
    fn missing_and_malformed_records_read_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.json");
        assert_eq!(read_json_or_default::<Counter>(&path), Counter::default());

        std::fs::write(&path, b"{not json").unwrap();
        assert_eq!(read_json_or_default::<Counter>(&path), Counter::default());

        std::fs::write(&path, br#"["wrong", "shape"]"#).unwrap();
        assert_eq!(read_json_or_default::<Counter>(&path), Counter::default());
    }

    #[test]
    fn write_atomic_replaces_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        write_json_atomic(&path, &Counter { value: 1 }).unwrap();
        write_json_atomic(&path, &Counter { value: 2 }).unwrap();

        assert_eq!(read_json_or_default::<Counter>(&path), Counter { value: 2 });
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn update_json_skips_write_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.json");
        let seen = update_json(&path, |counter: &mut Counter| (counter.value, false)).unwrap();
        assert_eq!(seen, 0);
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("counter.json"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                thread::spawn(move || {
                    for _ in 0..10 {
                        update_json(&path, |counter: &mut Counter| {
                            counter.value += 1;
                            ((), true)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(read_json_or_default::<Counter>(&path).value, 80);
    }
}
