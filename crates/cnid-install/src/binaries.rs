//! Plugin binary installation onto the host.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{InstallError, InstallResult};
use crate::fs_util;

/// Mode of installed plugin binaries.
const BINARY_MODE: u32 = 0o755;

/// Copy every regular file in `source_dir` into each of `target_dirs`.
///
/// Names listed in `skip` are never copied. When `update` is false a binary
/// already present on the host is left alone. Returns the paths written.
///
/// # Errors
///
/// Returns [`InstallError::Io`] if the source cannot be listed or any copy fails.
pub fn copy_binaries(
    source_dir: &Path,
    target_dirs: &[PathBuf],
    update: bool,
    skip: &[String],
) -> InstallResult<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(source_dir).map_err(|e| InstallError::io(source_dir, e))? {
        let entry = entry.map_err(|e| InstallError::io(source_dir, e))?;
        let path = entry.path();
        // Follow symlinks: images commonly link plugin binaries.
        if path.is_file() {
            sources.push((entry.file_name(), path));
        }
    }
    sources.sort();

    let mut written = Vec::new();
    for target_dir in target_dirs {
        std::fs::create_dir_all(target_dir).map_err(|e| InstallError::io(target_dir, e))?;

        for (name, source) in &sources {
            let name_str = name.to_string_lossy();
            if skip.iter().any(|s| s == name_str.as_ref()) {
                debug!(binary = %name_str, "Skipping binary");
                continue;
            }

            let target = target_dir.join(name);
            if !update && fs_util::file_exists(&target) {
                debug!(path = %target.display(), "Binary exists and updates are disabled");
                continue;
            }

            let contents = std::fs::read(source).map_err(|e| InstallError::io(source, e))?;
            fs_util::atomic_write(&target, &contents, BINARY_MODE)?;
            info!(path = %target.display(), "Installed CNI binary");
            written.push(target);
        }
    }

    Ok(written)
}
