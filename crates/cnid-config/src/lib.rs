#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Install configuration for the cnid CNI install daemon.
//!
//! [`InstallConfig`] is loaded once at process start and handed read-only
//! to the installer. It can come from a TOML file, from defaults, or from
//! defaults overlaid with command-line flags by the daemon binary.
//!
//! ```rust,no_run
//! use cnid_config::InstallConfig;
//!
//! let config = InstallConfig::load_file(std::path::Path::new("/etc/cnid/config.toml")).unwrap();
//! println!("watching {}", config.mounted_cni_net_dir.display());
//! ```

/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl InstallConfig {
    /// Load configuration from a single TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }

    /// Check field ranges and cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::ValidationError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::validate(self)
    }
}
