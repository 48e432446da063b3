//! Configuration validation.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{CNI_CONF_EXTENSIONS, InstallConfig};

/// Validate an install configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &InstallConfig) -> ConfigResult<()> {
    validate_dirs(config)?;
    validate_conf_name(config)?;
    validate_service(config)?;
    validate_kubeconfig(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_dirs(config: &InstallConfig) -> ConfigResult<()> {
    if config.mounted_cni_net_dir.as_os_str().is_empty() {
        return Err(invalid("mounted_cni_net_dir", "must not be empty"));
    }
    if config.host_cni_net_dir.as_os_str().is_empty() {
        return Err(invalid("host_cni_net_dir", "must not be empty"));
    }
    if config.cni_bin_source_dir.as_os_str().is_empty() {
        return Err(invalid("cni_bin_source_dir", "must not be empty"));
    }
    if config.cni_bin_target_dirs.is_empty() {
        return Err(invalid(
            "cni_bin_target_dirs",
            "at least one target directory is required",
        ));
    }
    if config
        .cni_bin_target_dirs
        .iter()
        .any(|d| d.as_os_str().is_empty())
    {
        return Err(invalid("cni_bin_target_dirs", "entries must not be empty"));
    }
    Ok(())
}

fn validate_conf_name(config: &InstallConfig) -> ConfigResult<()> {
    let Some(name) = config.cni_conf_name.as_deref() else {
        return Ok(());
    };
    if name.contains('/') {
        return Err(invalid("cni_conf_name", "must be a file name, not a path"));
    }
    let ext = Path::new(name).extension().and_then(|e| e.to_str());
    if !ext.is_some_and(|e| CNI_CONF_EXTENSIONS.contains(&e)) {
        return Err(invalid(
            "cni_conf_name",
            format!("'{name}' must end in .conf, .conflist or .json"),
        ));
    }
    Ok(())
}

fn validate_service(config: &InstallConfig) -> ConfigResult<()> {
    if !matches!(config.k8s_service_protocol.as_str(), "http" | "https") {
        return Err(invalid(
            "k8s_service_protocol",
            format!(
                "unsupported protocol '{}'; expected http or https",
                config.k8s_service_protocol
            ),
        ));
    }
    if config.k8s_service_port == Some(0) {
        return Err(invalid("k8s_service_port", "port must be non-zero"));
    }
    if config
        .k8s_service_host
        .as_deref()
        .is_some_and(|h| h.trim().is_empty())
    {
        return Err(invalid("k8s_service_host", "must not be blank when set"));
    }
    Ok(())
}

fn validate_kubeconfig(config: &InstallConfig) -> ConfigResult<()> {
    if config.kubeconfig_filename.is_empty() || config.kubeconfig_filename.contains('/') {
        return Err(invalid(
            "kubeconfig_filename",
            "must be a non-empty file name",
        ));
    }
    if config.kubeconfig_mode > 0o777 {
        return Err(invalid(
            "kubeconfig_mode",
            format!("mode {:o} exceeds 0o777", config.kubeconfig_mode),
        ));
    }
    Ok(())
}
