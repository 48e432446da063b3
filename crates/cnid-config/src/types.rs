//! Configuration types for the install daemon.
//!
//! Every field has a production default matching a standard node layout,
//! so an empty TOML file yields a working configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Type name of the managed CNI plugin.
pub const MANAGED_PLUGIN_TYPE: &str = "istio-cni";

/// Binaries installed onto the host and removed again on cleanup.
pub const INSTALLED_BINARIES: &[&str] = &["istio-cni", "istio-iptables"];

/// File name used for the standalone config when no override is set.
pub const DEFAULT_STANDALONE_CONF_NAME: &str = "YY-istio-cni.conf";

/// Extensions the container runtime accepts as network config files.
pub const CNI_CONF_EXTENSIONS: &[&str] = &["conf", "conflist", "json"];

/// Parameters for one node's CNI installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// CNI net directory as mounted into this container. Watched and written.
    pub mounted_cni_net_dir: PathBuf,
    /// The same directory as seen from the host, used in rendered references.
    pub host_cni_net_dir: PathBuf,
    /// Explicit config file name. Disables preemption drift when set.
    pub cni_conf_name: Option<String>,
    /// Insert into an existing plugin chain instead of writing a standalone file.
    pub chained_cni_plugin: bool,
    /// Optional JSON template for the plugin entry.
    pub cni_network_config: Option<String>,
    /// Log level handed to the plugin binary.
    pub log_level: String,
    /// Unix socket the plugin binary sends its logs to.
    pub log_uds_address: Option<String>,
    /// File name of the rendered kubeconfig inside the net directory.
    pub kubeconfig_filename: String,
    /// Permission bits of the rendered kubeconfig.
    pub kubeconfig_mode: u32,
    /// CA bundle embedded into the kubeconfig.
    pub kube_ca_file: Option<PathBuf>,
    /// Emit `insecure-skip-tls-verify` instead of CA data.
    pub skip_tls_verify: bool,
    /// `http` or `https`.
    pub k8s_service_protocol: String,
    /// API server host. Usually `KUBERNETES_SERVICE_HOST`.
    pub k8s_service_host: Option<String>,
    /// API server port. Usually `KUBERNETES_SERVICE_PORT`.
    pub k8s_service_port: Option<u16>,
    /// Where the plugin binaries ship inside this image.
    pub cni_bin_source_dir: PathBuf,
    /// Host binary directories the plugins are copied into.
    pub cni_bin_target_dirs: Vec<PathBuf>,
    /// Overwrite binaries that already exist on the host.
    pub update_cni_binaries: bool,
    /// Binary names never copied.
    pub skip_cni_binaries: Vec<String>,
    /// Namespaces the plugin ignores.
    pub exclude_namespaces: Vec<String>,
    /// Mounted service-account secret directory.
    pub service_account_dir: PathBuf,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            mounted_cni_net_dir: PathBuf::from("/host/etc/cni/net.d"),
            host_cni_net_dir: PathBuf::from("/etc/cni/net.d"),
            cni_conf_name: None,
            chained_cni_plugin: true,
            cni_network_config: None,
            log_level: "info".to_owned(),
            log_uds_address: None,
            kubeconfig_filename: "ZZZ-istio-cni-kubeconfig".to_owned(),
            kubeconfig_mode: 0o600,
            kube_ca_file: None,
            skip_tls_verify: false,
            k8s_service_protocol: "https".to_owned(),
            k8s_service_host: None,
            k8s_service_port: None,
            cni_bin_source_dir: PathBuf::from("/opt/cni/bin"),
            cni_bin_target_dirs: vec![PathBuf::from("/host/opt/cni/bin")],
            update_cni_binaries: true,
            skip_cni_binaries: Vec::new(),
            exclude_namespaces: Vec::new(),
            service_account_dir: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount"),
        }
    }
}

impl InstallConfig {
    /// Path of the service-account bearer token.
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        self.service_account_dir.join("token")
    }

    /// Host binary directory referenced by the rendered plugin entry.
    #[must_use]
    pub fn primary_bin_dir(&self) -> PathBuf {
        self.cni_bin_target_dirs
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("/opt/cni/bin"))
    }
}
