//! Versioned file storage.
//!
//! Each allowed directory holds families of files: the current `base.ext` and
//! older copies in `base_vN.ext` slots. Storing over an existing name moves
//! the current file into the smallest free slot first, so nothing is ever
//! overwritten. Mutations in one directory are serialized by a lock file.

mod name;
mod path;

pub use name::VersionedName;

use crate::storage::{FileLock, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use ulid::Ulid;
use utoipa::ToSchema;

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("directory {0:?} is not allowed")]
    InvalidDirectory(String),
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),
    #[error("invalid subfolder {0:?}")]
    InvalidSubfolder(String),
    #[error("{0:?} is a version slot name")]
    VersionedName(String),
    #[error("{0:?} is not a versioned file")]
    NotVersioned(String),
    #[error("{0:?} resolves outside its directory")]
    PathEscape(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, ToSchema)]
pub struct Stored {
    /// Name the new content was written under, relative to the directory.
    pub final_name: String,
    /// Slot the previous current file moved to, if there was one.
    pub displaced: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RestoreOutcome {
    Restored {
        restored_as: String,
        displaced: Option<String>,
    },
    /// The requested version no longer exists.
    Stale,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, ToSchema)]
pub struct FileEntry {
    pub name: String,
    pub version: Option<u64>,
    pub size: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, ToSchema)]
pub struct FileFamily {
    /// Current file name of the family, e.g. `a.txt`.
    pub base: String,
    pub current: Option<FileEntry>,
    /// Older copies, lowest slot first.
    pub versions: Vec<FileEntry>,
}

#[derive(Clone, Debug)]
pub struct VersionedFileStore {
    root: PathBuf,
    directories: Vec<String>,
    locks_dir: PathBuf,
}

impl VersionedFileStore {
    #[must_use]
    pub fn new(root: PathBuf, directories: Vec<String>, locks_dir: PathBuf) -> Self {
        Self {
            root,
            directories,
            locks_dir,
        }
    }

    #[must_use]
    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    #[must_use]
    pub fn is_allowed_directory(&self, directory: &str) -> bool {
        self.directories.iter().any(|allowed| allowed == directory)
    }

    /// Save `bytes` as `file_name`, versioning any existing file of that name.
    ///
    /// Names already shaped like a version slot (`base_vN.ext`) are refused
    /// with [`StoreError::VersionedName`]; only the store assigns slots.
    ///
    /// # Errors
    /// Fails on a disallowed directory, an unsafe or version-slot file name,
    /// lock timeout, or I/O failure.
    pub fn store_versioned(
        &self,
        directory: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Stored, StoreError> {
        let root = self.directory_root(directory)?;
        let _lock = self.lock(directory)?;
        let stored = store_in(&root, &root, file_name, bytes)?;
        info!(
            "Stored {directory}/{} (displaced: {:?})",
            stored.final_name, stored.displaced
        );
        Ok(stored)
    }

    /// Admin text-file creation, optionally inside a subfolder that is
    /// created on demand. Versioning matches [`Self::store_versioned`].
    ///
    /// # Errors
    /// As [`Self::store_versioned`], plus an invalid subfolder.
    pub fn create(
        &self,
        directory: &str,
        subfolder: Option<&str>,
        file_name: &str,
        content: &[u8],
    ) -> Result<Stored, StoreError> {
        let file_name = file_name.trim();
        let subfolder = subfolder.map(str::trim).filter(|s| !s.is_empty());
        let relative = subfolder.map(path::validate_subfolder).transpose()?;
        path::validate_file_name(file_name)?;

        let root = self.directory_root(directory)?;
        let _lock = self.lock(directory)?;

        let target_dir = match &relative {
            Some(relative) => create_subfolder(&root, relative)?,
            None => root.clone(),
        };

        let stored = store_in(&root, &target_dir, file_name, content)?;
        let prefix = relative
            .map(|r| format!("{}/", r.to_string_lossy()))
            .unwrap_or_default();
        let stored = Stored {
            final_name: format!("{prefix}{}", stored.final_name),
            displaced: stored.displaced.map(|slot| format!("{prefix}{slot}")),
        };
        info!("Created {directory}/{}", stored.final_name);
        Ok(stored)
    }

    /// Promote a version slot to current; the current file takes the smallest
    /// free slot.
    ///
    /// # Errors
    /// Fails on a disallowed directory, a name that is not a version slot,
    /// path escape, lock timeout, or I/O failure.
    pub fn restore(&self, directory: &str, file_name: &str) -> Result<RestoreOutcome, StoreError> {
        let root = self.directory_root(directory)?;
        path::validate_file_name(file_name)?;
        let name = VersionedName::parse(file_name);
        if !name.is_versioned() {
            return Err(StoreError::NotVersioned(file_name.to_string()));
        }

        let _lock = self.lock(directory)?;
        let source = root.join(file_name);
        if !exists(&source)? {
            debug!("Restore of {directory}/{file_name}: already gone");
            return Ok(RestoreOutcome::Stale);
        }
        path::ensure_inside(&root, &source, file_name)?;
        if source.is_dir() {
            return Err(StoreError::InvalidFileName(file_name.to_string()));
        }

        let restored_as = name.current_name();
        let current = root.join(&restored_as);
        let displaced = if exists(&current)? {
            path::ensure_inside(&root, &current, &restored_as)?;
            Some(move_to_free_slot(&root, &name, &current)?)
        } else {
            None
        };
        fs::rename(&source, &current).map_err(StoreError::io(&source))?;

        info!("Restored {directory}/{file_name} as {restored_as} (displaced: {displaced:?})");
        Ok(RestoreOutcome::Restored {
            restored_as,
            displaced,
        })
    }

    /// Remove one file, current or versioned.
    ///
    /// # Errors
    /// Fails on a disallowed directory, an unsafe name, path escape, lock
    /// timeout, or I/O failure.
    pub fn delete_version(
        &self,
        directory: &str,
        file_name: &str,
    ) -> Result<DeleteOutcome, StoreError> {
        let root = self.directory_root(directory)?;
        path::validate_file_name(file_name)?;

        let _lock = self.lock(directory)?;
        let target = root.join(file_name);
        if !exists(&target)? {
            return Ok(DeleteOutcome::AlreadyGone);
        }
        path::ensure_inside(&root, &target, file_name)?;
        if target.is_dir() {
            return Err(StoreError::InvalidFileName(file_name.to_string()));
        }
        fs::remove_file(&target).map_err(StoreError::io(&target))?;

        info!("Deleted {directory}/{file_name}");
        Ok(DeleteOutcome::Deleted)
    }

    /// Group the directory's files into families, sorted by base name.
    ///
    /// # Errors
    /// Fails on a disallowed directory or if the directory cannot be read.
    pub fn list_families(&self, directory: &str) -> Result<Vec<FileFamily>, StoreError> {
        let root = self.directory_root(directory)?;
        let mut families: BTreeMap<String, FileFamily> = BTreeMap::new();

        for entry in fs::read_dir(&root).map_err(StoreError::io(&root))? {
            let entry = entry.map_err(StoreError::io(&root))?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_temp_file(&file_name) {
                continue;
            }

            let size = entry.metadata().map(|meta| meta.len()).unwrap_or_default();
            let name = VersionedName::parse(&file_name);
            let base = name.current_name();
            let family = families.entry(base.clone()).or_insert_with(|| FileFamily {
                base,
                current: None,
                versions: Vec::new(),
            });
            let file = FileEntry {
                name: file_name,
                version: name.version,
                size,
            };
            if file.version.is_some() {
                family.versions.push(file);
            } else {
                family.current = Some(file);
            }
        }

        Ok(families
            .into_values()
            .map(|mut family| {
                family.versions.sort_by_key(|file| file.version);
                family
            })
            .collect())
    }

    /// Canonical root of an allowed directory, created if missing.
    fn directory_root(&self, directory: &str) -> Result<PathBuf, StoreError> {
        if !self.is_allowed_directory(directory) {
            return Err(StoreError::InvalidDirectory(directory.to_string()));
        }
        let dir = self.root.join(directory);
        fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
        dir.canonicalize().map_err(StoreError::io(&dir))
    }

    fn lock(&self, directory: &str) -> Result<FileLock, StoreError> {
        let name = directory.replace(&['/', '\\'][..], "_");
        Ok(FileLock::acquire(&self.locks_dir.join(format!("{name}.lock")))?)
    }
}

/// Write `bytes` as `dir/file_name`. Caller holds the directory lock.
fn store_in(root: &Path, dir: &Path, file_name: &str, bytes: &[u8]) -> Result<Stored, StoreError> {
    path::validate_file_name(file_name)?;
    let name = VersionedName::parse(file_name);
    if name.is_versioned() {
        return Err(StoreError::VersionedName(file_name.to_string()));
    }

    let target = dir.join(file_name);
    let existing = exists(&target)?;
    if existing {
        path::ensure_inside(root, &target, file_name)?;
        if target.is_dir() {
            return Err(StoreError::InvalidFileName(file_name.to_string()));
        }
    }

    let temp = dir.join(format!(".{file_name}.{}{TEMP_SUFFIX}", Ulid::new()));
    let result = write_new(&temp, bytes)
        .map_err(StoreError::io(&temp))
        .and_then(|()| {
            let displaced = if existing {
                Some(move_to_free_slot(dir, &name, &target)?)
            } else {
                None
            };
            fs::rename(&temp, &target).map_err(StoreError::io(&target))?;
            Ok(displaced)
        });

    match result {
        Ok(displaced) => Ok(Stored {
            final_name: file_name.to_string(),
            displaced,
        }),
        Err(err) => {
            let _ = fs::remove_file(&temp);
            Err(err)
        }
    }
}

/// Create `relative` under `root` one component at a time, checking each
/// level before descending so a symlinked component never gets a child.
fn create_subfolder(root: &Path, relative: &Path) -> Result<PathBuf, StoreError> {
    let label = relative.to_string_lossy();
    let mut dir = root.to_path_buf();
    for part in relative.components() {
        dir.push(part);
        if !exists(&dir)? {
            match fs::create_dir(&dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(StoreError::io(&dir)(err)),
            }
        }
        path::ensure_inside(root, &dir, &label)?;
        if !dir.is_dir() {
            return Err(StoreError::InvalidSubfolder(label.to_string()));
        }
    }
    Ok(dir)
}

fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Move `source` into the smallest free `_vN` slot of its family.
fn move_to_free_slot(
    dir: &Path,
    name: &VersionedName,
    source: &Path,
) -> Result<String, StoreError> {
    let mut version = 1_u64;
    loop {
        let slot_name = name.slot_name(version);
        let slot = dir.join(&slot_name);
        if !exists(&slot)? {
            match move_no_clobber(source, &slot) {
                Ok(()) => return Ok(slot_name),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Slot {} taken concurrently, trying next", slot.display());
                }
                Err(err) => return Err(StoreError::io(source)(err)),
            }
        }
        version += 1;
    }
}

/// Rename that refuses to replace an existing destination.
///
/// A hard link fails atomically when `to` exists; filesystems without hard
/// links fall back to an existence check and a plain rename.
fn move_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => fs::remove_file(from),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(err),
        Err(_) => {
            if exists(to).unwrap_or(true) {
                return Err(io::Error::from(io::ErrorKind::AlreadyExists));
            }
            fs::rename(from, to)
        }
    }
}

/// Existence without following symlinks, so dangling links count.
fn exists(path: &Path) -> Result<bool, StoreError> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::io(path)(err)),
    }
}

fn is_temp_file(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(TEMP_SUFFIX)
}
