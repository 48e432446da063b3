//! Config file loading.

use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::types::InstallConfig;
use crate::validate;

/// Maximum config file size (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Load and validate a TOML config file.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, is too large, fails
/// to parse, or fails validation.
pub fn load_file(path: &Path) -> ConfigResult<InstallConfig> {
    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                metadata.len()
            ),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let config = parse(&content, &path.display().to_string())?;
    validate::validate(&config)?;
    info!(path = %path.display(), "loaded install config");
    Ok(config)
}

/// Parse TOML text into a config without validating it.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] on malformed TOML or unknown value types.
pub fn parse(content: &str, origin: &str) -> ConfigResult<InstallConfig> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })
}
