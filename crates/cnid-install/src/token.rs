//! Service-account token access.

use std::path::Path;

use crate::error::{InstallError, InstallResult};

/// Read the bearer token mounted at `path`.
///
/// The token rotates, so callers re-read it every install cycle.
///
/// # Errors
///
/// Returns [`InstallError::NoServiceAccountToken`] when the file is absent
/// and [`InstallError::Io`] when it cannot be read.
pub fn read_service_account_token(path: &Path) -> InstallResult<String> {
    match std::fs::read_to_string(path) {
        Ok(token) => Ok(token.trim().to_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(InstallError::NoServiceAccountToken(path.to_path_buf()))
        },
        Err(e) => Err(InstallError::io(path, e)),
    }
}
