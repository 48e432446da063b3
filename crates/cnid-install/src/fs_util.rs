//! Filesystem helpers shared by the installer steps.

use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{InstallError, InstallResult};

/// Whether `path` exists. Errors other than "not found" count as existing so
/// that callers go on to surface them from the real operation.
#[must_use]
pub fn file_exists(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(_) => true,
        Err(e) => e.kind() != std::io::ErrorKind::NotFound,
    }
}

/// Atomically replace `path` with `contents` and the given permission bits.
///
/// Writes a temp file in the same directory, syncs it, sets the mode, and
/// renames it over the target so readers never observe a partial file.
///
/// # Errors
///
/// Returns [`InstallError::Io`] if any step fails.
pub fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> InstallResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".cnid-")
        .tempfile_in(parent)
        .map_err(|e| InstallError::io(parent, e))?;

    tmp.write_all(contents)
        .map_err(|e| InstallError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| InstallError::io(tmp.path(), e))?;
    set_mode(tmp.as_file(), mode).map_err(|e| InstallError::io(tmp.path(), e))?;

    tmp.persist(path)
        .map_err(|e| InstallError::io(path, e.error))?;

    debug!(path = %path.display(), bytes = contents.len(), "Atomically wrote file");
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &std::fs::File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &std::fs::File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Delete a file, treating "already absent" as success.
///
/// Returns `true` if a file was removed.
///
/// # Errors
///
/// Returns [`InstallError::Io`] for any other failure.
pub fn remove_if_exists(path: &Path) -> InstallResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(InstallError::io(path, e)),
    }
}
