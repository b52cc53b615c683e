//! Path containment checks for client-supplied names.

use super::StoreError;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Accept a plain file name: one normal component, no separators.
pub(crate) fn validate_file_name(name: &str) -> Result<&str, StoreError> {
    let invalid = || {
        warn!("Rejecting file name {name:?}: not a single plain component");
        StoreError::InvalidFileName(name.to_string())
    };
    if name.is_empty() || name.contains(&['/', '\\', '\0'][..]) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid()),
    }
}

/// Accept a relative folder such as `reports/2026`; no `..`, no root.
pub(crate) fn validate_subfolder(subfolder: &str) -> Result<PathBuf, StoreError> {
    let invalid = || {
        warn!("Rejecting subfolder {subfolder:?}: traversal or absolute path");
        StoreError::InvalidSubfolder(subfolder.to_string())
    };
    if subfolder.contains("..")
        || subfolder.starts_with(&['/', '\\'][..])
        || subfolder.contains('\0')
    {
        return Err(invalid());
    }
    let mut path = PathBuf::new();
    for component in Path::new(&subfolder.replace('\\', "/")).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    Ok(path)
}

/// Fail with `PathEscape` unless `candidate` resolves under `root`.
///
/// `root` must already be canonical. Symlinks are followed, so a link inside
/// the directory pointing elsewhere is rejected.
pub(crate) fn ensure_inside(root: &Path, candidate: &Path, label: &str) -> Result<(), StoreError> {
    let resolved = candidate.canonicalize().map_err(|err| {
        warn!(
            "Rejecting {label}: cannot resolve {}: {err}",
            candidate.display()
        );
        StoreError::PathEscape(label.to_string())
    })?;
    if resolved.starts_with(root) {
        Ok(())
    } else {
        warn!(
            "Rejecting {label}: {} resolves outside {}",
            candidate.display(),
            root.display()
        );
        Err(StoreError::PathEscape(label.to_string()))
    }
}
