//! Verification of the installed CNI fragment.

use std::path::Path;

use cnid_config::{InstallConfig, MANAGED_PLUGIN_TYPE};
use serde_json::Value;
use tracing::warn;

use crate::cni_conf::default_network;
use crate::document::{self, TYPE_KEY};
use crate::error::{Drift, InstallError, InstallResult};
use crate::fs_util;

/// Check that `installed` is still the active, intact CNI config.
///
/// Returns `Ok(None)` when valid and `Ok(Some(drift))` when an external
/// change invalidated it. A document that exists but cannot be parsed is an
/// error, not drift.
///
/// # Errors
///
/// Returns parse, plugin-list and I/O errors.
pub fn check_install(config: &InstallConfig, installed: &Path) -> InstallResult<Option<Drift>> {
    let dir = &config.mounted_cni_net_dir;

    let active = match config.cni_conf_name.as_deref() {
        Some(name) => dir.join(name),
        None => match default_network(dir) {
            Ok(path) => path,
            Err(InstallError::NoDefaultNetwork(_)) => {
                return Ok(Some(Drift::Removed(installed.to_path_buf())));
            },
            Err(e) => return Err(e),
        },
    };

    if active != installed {
        if config.cni_conf_name.is_some() {
            warn!(
                expected = %installed.display(),
                active = %active.display(),
                "CNI config file differs from the configured override; continuing"
            );
        } else {
            return Ok(Some(Drift::Preempted {
                expected: installed.to_path_buf(),
                found: active,
            }));
        }
    }

    if !fs_util::file_exists(installed) {
        return Ok(Some(Drift::Removed(installed.to_path_buf())));
    }

    let doc = match document::load(installed) {
        Ok(doc) => doc,
        // Deleted between the existence check and the read.
        Err(InstallError::Io { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            return Ok(Some(Drift::Removed(installed.to_path_buf())));
        },
        Err(e) => return Err(e),
    };

    if config.chained_cni_plugin {
        match document::find_plugin(&doc, MANAGED_PLUGIN_TYPE)? {
            Some(_) => Ok(None),
            None => Ok(Some(Drift::PluginRemoved(installed.to_path_buf()))),
        }
    } else if doc.get(TYPE_KEY).and_then(Value::as_str) == Some(MANAGED_PLUGIN_TYPE) {
        Ok(None)
    } else {
        Ok(Some(Drift::Modified(installed.to_path_buf())))
    }
}
