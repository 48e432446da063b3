//! The install/verify/watch control loop.

use std::path::{Path, PathBuf};

use cnid_config::{INSTALLED_BINARIES, InstallConfig, MANAGED_PLUGIN_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binaries::copy_binaries;
use crate::check::check_install;
use crate::cni_conf::{CNI_CONF_MODE, create_cni_config_file};
use crate::document;
use crate::error::{InstallError, InstallResult};
use crate::fs_util;
use crate::kubeconfig::create_kubeconfig_file;
use crate::readiness::Readiness;
use crate::token::read_service_account_token;
use crate::watcher::{
    DirectoryWatcher, ModificationRx, WatchErrorRx, poll_pending, wait_for_modification,
};

/// Installs the managed CNI plugin and keeps it installed.
///
/// Drift restarts the whole install sequence rather than patching the one
/// thing that changed; every step is an idempotent overwrite.
pub struct Installer {
    config: InstallConfig,
    readiness: Readiness,
    sa_token: String,
    kubeconfig_path: Option<PathBuf>,
    cni_config_path: Option<PathBuf>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("config", &self.config)
            .field("readiness", &self.readiness)
            .field("has_sa_token", &!self.sa_token.is_empty())
            .field("kubeconfig_path", &self.kubeconfig_path)
            .field("cni_config_path", &self.cni_config_path)
            .finish()
    }
}

impl Installer {
    /// Create an installer. `readiness` is shared with the health probe.
    #[must_use]
    pub fn new(config: InstallConfig, readiness: Readiness) -> Self {
        Self {
            config,
            readiness,
            sa_token: String::new(),
            kubeconfig_path: None,
            cni_config_path: None,
        }
    }

    /// The install configuration.
    #[must_use]
    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    /// The readiness signal this installer writes.
    #[must_use]
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Kubeconfig written on the current cycle.
    #[must_use]
    pub fn kubeconfig_path(&self) -> Option<&Path> {
        self.kubeconfig_path.as_deref()
    }

    /// CNI config fragment written on the current cycle.
    #[must_use]
    pub fn cni_config_path(&self) -> Option<&Path> {
        self.cni_config_path.as_deref()
    }

    /// Run install cycles until a fatal error or cancellation.
    ///
    /// Never returns `Ok`: drift is handled internally by reinstalling.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, or [`InstallError::Cancelled`].
    pub async fn run(&mut self, cancel: &CancellationToken) -> InstallResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(InstallError::Cancelled);
            }

            info!("Copying CNI binaries to the host");
            copy_binaries(
                &self.config.cni_bin_source_dir,
                &self.config.cni_bin_target_dirs,
                self.config.update_cni_binaries,
                &self.config.skip_cni_binaries,
            )?;

            self.sa_token = read_service_account_token(&self.config.token_path())?;
            self.kubeconfig_path = Some(create_kubeconfig_file(&self.config, &self.sa_token)?);

            let cni_config_path =
                create_cni_config_file(cancel, &self.config, &self.sa_token).await?;
            self.cni_config_path = Some(cni_config_path.clone());

            sleep_check_install(cancel, &self.config, &cni_config_path, &self.readiness).await?;

            info!("Restarting...");
        }
    }

    /// Undo the installation: strip or delete the CNI config, delete the
    /// kubeconfig and the installed binaries.
    ///
    /// Safe to call when [`run`](Self::run) never got anywhere; missing files
    /// are skipped. The first failure aborts the remaining steps.
    ///
    /// # Errors
    ///
    /// Returns the first filesystem, parse or plugin-list error.
    pub fn cleanup(&self) -> InstallResult<()> {
        info!("Cleaning up");

        if let Some(path) = self
            .cni_config_path
            .as_deref()
            .filter(|p| fs_util::file_exists(p))
        {
            if self.config.chained_cni_plugin {
                info!(path = %path.display(), "Removing istio-cni from CNI config chain");
                let mut doc = document::load(path)?;
                if document::remove_plugin(&mut doc, MANAGED_PLUGIN_TYPE)?.is_none() {
                    debug!(path = %path.display(), "istio-cni not present in chain");
                }
                document::save(path, &doc, CNI_CONF_MODE)?;
            } else {
                info!(path = %path.display(), "Removing istio-cni CNI config file");
                fs_util::remove_if_exists(path)?;
            }
        }

        if let Some(path) = self.kubeconfig_path.as_deref() {
            if fs_util::remove_if_exists(path)? {
                info!(path = %path.display(), "Removed kubeconfig");
            }
        }

        for dir in &self.config.cni_bin_target_dirs {
            for name in INSTALLED_BINARIES {
                let path = dir.join(name);
                if fs_util::remove_if_exists(&path)? {
                    info!(path = %path.display(), "Removed CNI binary");
                }
            }
        }

        Ok(())
    }
}

/// Watch the net directory and keep `readiness` up to date until the
/// installed fragment drifts.
///
/// The watcher is created before the first check so no modification between
/// check and registration is lost. Returns `Ok(())` on drift or on a
/// modification already pending at the non-blocking poll; the caller
/// reinstalls. Readiness is not-ready on every return path, set before the
/// watcher is released.
///
/// # Errors
///
/// Returns fatal check errors, watcher errors, or [`InstallError::Cancelled`].
pub async fn sleep_check_install(
    cancel: &CancellationToken,
    config: &InstallConfig,
    installed: &Path,
    readiness: &Readiness,
) -> InstallResult<()> {
    let (watcher, mut mods, mut errors) = match DirectoryWatcher::new(&config.mounted_cni_net_dir) {
        Ok(parts) => parts,
        Err(e) => {
            readiness.mark_not_ready();
            return Err(e);
        },
    };

    let result = watch_loop(cancel, config, installed, readiness, &mut mods, &mut errors).await;

    readiness.mark_not_ready();
    watcher.close();
    result
}

async fn watch_loop(
    cancel: &CancellationToken,
    config: &InstallConfig,
    installed: &Path,
    readiness: &Readiness,
    mods: &mut ModificationRx,
    errors: &mut WatchErrorRx,
) -> InstallResult<()> {
    loop {
        if let Some(drift) = check_install(config, installed)? {
            warn!(reason = %drift, "Invalid configuration. Restarting...");
            return Ok(());
        }

        if let Some(pending) = poll_pending(cancel, mods, errors) {
            if pending.is_ok() {
                info!("Detected change in CNI config directory. Restarting...");
            }
            return pending;
        }

        if !readiness.is_ready() {
            info!(path = %installed.display(), "CNI config verified; marking ready");
        }
        readiness.mark_ready();

        wait_for_modification(cancel, mods, errors).await?;
        debug!("CNI config directory modified; re-verifying");
    }
}
