//! Command-line arguments and their overlay onto the install config.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cnid_config::InstallConfig;
use cnid_telemetry::{LogConfig, LogFormat};

/// cnid: installs the istio-cni plugin on this node and keeps it installed.
#[derive(Debug, Parser)]
#[command(name = "cnid")]
#[command(author, version, about = "Install and supervise the istio-cni plugin configuration")]
pub(crate) struct Args {
    /// TOML install config. Flags and environment override its values.
    #[arg(long, env = "CNID_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// CNI net directory as mounted into this container.
    #[arg(long, env = "CNID_MOUNTED_CNI_NET_DIR")]
    pub(crate) mounted_cni_net_dir: Option<PathBuf>,

    /// CNI net directory as seen from the host.
    #[arg(long, env = "CNID_HOST_CNI_NET_DIR")]
    pub(crate) host_cni_net_dir: Option<PathBuf>,

    /// Use this CNI config file instead of the lexicographically first one.
    #[arg(long, env = "CNID_CNI_CONF_NAME")]
    pub(crate) cni_conf_name: Option<String>,

    /// Chain onto the existing network config (true) or write a standalone file (false).
    #[arg(long, env = "CNID_CHAINED_CNI_PLUGIN")]
    pub(crate) chained_cni_plugin: Option<bool>,

    /// JSON template for the plugin entry.
    #[arg(long, env = "CNID_CNI_NETWORK_CONFIG")]
    pub(crate) cni_network_config: Option<String>,

    /// Log level handed to the plugin binary.
    #[arg(long, env = "CNID_PLUGIN_LOG_LEVEL")]
    pub(crate) plugin_log_level: Option<String>,

    /// Unix socket the plugin binary logs to.
    #[arg(long, env = "CNID_LOG_UDS_ADDRESS")]
    pub(crate) log_uds_address: Option<String>,

    /// File name of the rendered kubeconfig.
    #[arg(long, env = "CNID_KUBECONFIG_FILENAME")]
    pub(crate) kubeconfig_filename: Option<String>,

    /// Octal permission bits of the rendered kubeconfig (e.g. 600).
    #[arg(long, env = "CNID_KUBECONFIG_MODE", value_parser = parse_octal)]
    pub(crate) kubeconfig_mode: Option<u32>,

    /// CA bundle embedded into the kubeconfig.
    #[arg(long, env = "CNID_KUBE_CA_FILE")]
    pub(crate) kube_ca_file: Option<PathBuf>,

    /// Skip API server certificate verification.
    #[arg(long, env = "CNID_SKIP_TLS_VERIFY")]
    pub(crate) skip_tls_verify: Option<bool>,

    /// API server protocol.
    #[arg(long, env = "CNID_K8S_SERVICE_PROTOCOL")]
    pub(crate) k8s_service_protocol: Option<String>,

    /// API server host.
    #[arg(long, env = "KUBERNETES_SERVICE_HOST")]
    pub(crate) k8s_service_host: Option<String>,

    /// API server port.
    #[arg(long, env = "KUBERNETES_SERVICE_PORT")]
    pub(crate) k8s_service_port: Option<u16>,

    /// Directory holding the plugin binaries in this image.
    #[arg(long, env = "CNID_CNI_BIN_SOURCE_DIR")]
    pub(crate) cni_bin_source_dir: Option<PathBuf>,

    /// Host binary directories to install into (comma separated).
    #[arg(long, env = "CNID_CNI_BIN_TARGET_DIRS", value_delimiter = ',')]
    pub(crate) cni_bin_target_dirs: Option<Vec<PathBuf>>,

    /// Overwrite binaries already on the host.
    #[arg(long, env = "CNID_UPDATE_CNI_BINARIES")]
    pub(crate) update_cni_binaries: Option<bool>,

    /// Binaries never to copy (comma separated).
    #[arg(long, env = "CNID_SKIP_CNI_BINARIES", value_delimiter = ',')]
    pub(crate) skip_cni_binaries: Option<Vec<String>>,

    /// Namespaces the plugin ignores (comma separated).
    #[arg(long, env = "CNID_EXCLUDE_NAMESPACES", value_delimiter = ',')]
    pub(crate) exclude_namespaces: Option<Vec<String>>,

    /// Mounted service-account secret directory.
    #[arg(long, env = "CNID_SERVICE_ACCOUNT_DIR")]
    pub(crate) service_account_dir: Option<PathBuf>,

    /// Daemon log level or filter.
    #[arg(long, env = "CNID_LOG_LEVEL", default_value = "info")]
    pub(crate) log_level: String,

    /// Daemon log format: pretty, compact, json or full.
    #[arg(long, env = "CNID_LOG_FORMAT", default_value = "compact")]
    pub(crate) log_format: String,

    /// Enable debug logging.
    #[arg(short, long)]
    pub(crate) verbose: bool,
}

fn parse_octal(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|e| format!("'{s}' is not an octal mode: {e}"))
}

impl Args {
    /// Daemon logging configuration.
    pub(crate) fn log_config(&self) -> Result<LogConfig> {
        let level = if self.verbose {
            "debug"
        } else {
            self.log_level.as_str()
        };
        let format: LogFormat = self.log_format.parse()?;
        let mut config = LogConfig::new(level).with_format(format);
        if format == LogFormat::Json {
            config = config.without_ansi();
        }
        Ok(config)
    }

    /// Load the config file (or defaults), apply overrides, and validate.
    pub(crate) fn install_config(&self) -> Result<InstallConfig> {
        let mut config = match &self.config {
            Some(path) => InstallConfig::load_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => InstallConfig::default(),
        };
        self.apply(&mut config);
        config.validate().context("invalid install configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut InstallConfig) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut config.mounted_cni_net_dir, self.mounted_cni_net_dir.as_ref());
        set(&mut config.host_cni_net_dir, self.host_cni_net_dir.as_ref());
        set(&mut config.chained_cni_plugin, self.chained_cni_plugin.as_ref());
        set(&mut config.log_level, self.plugin_log_level.as_ref());
        set(&mut config.kubeconfig_filename, self.kubeconfig_filename.as_ref());
        set(&mut config.kubeconfig_mode, self.kubeconfig_mode.as_ref());
        set(&mut config.skip_tls_verify, self.skip_tls_verify.as_ref());
        set(&mut config.k8s_service_protocol, self.k8s_service_protocol.as_ref());
        set(&mut config.cni_bin_source_dir, self.cni_bin_source_dir.as_ref());
        set(&mut config.cni_bin_target_dirs, self.cni_bin_target_dirs.as_ref());
        set(&mut config.update_cni_binaries, self.update_cni_binaries.as_ref());
        set(&mut config.skip_cni_binaries, self.skip_cni_binaries.as_ref());
        set(&mut config.exclude_namespaces, self.exclude_namespaces.as_ref());
        set(&mut config.service_account_dir, self.service_account_dir.as_ref());

        if self.cni_conf_name.is_some() {
            config.cni_conf_name.clone_from(&self.cni_conf_name);
        }
        if self.cni_network_config.is_some() {
            config.cni_network_config.clone_from(&self.cni_network_config);
        }
        if self.log_uds_address.is_some() {
            config.log_uds_address.clone_from(&self.log_uds_address);
        }
        if self.kube_ca_file.is_some() {
            config.kube_ca_file.clone_from(&self.kube_ca_file);
        }
        if self.k8s_service_host.is_some() {
            config.k8s_service_host.clone_from(&self.k8s_service_host);
        }
        if self.k8s_service_port.is_some() {
            config.k8s_service_port = self.k8s_service_port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["cnid"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_octal("600").unwrap(), 0o600);
        assert_eq!(parse_octal("0o644").unwrap(), 0o644);
        assert!(parse_octal("9").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&[
            "--mounted-cni-net-dir",
            "/tmp/net.d",
            "--chained-cni-plugin",
            "false",
            "--cni-bin-target-dirs",
            "/a,/b",
            "--kubeconfig-mode",
            "640",
            "--k8s-service-host",
            "10.0.0.1",
            "--k8s-service-port",
            "6443",
        ]);
        let config = args.install_config().unwrap();

        assert_eq!(config.mounted_cni_net_dir, PathBuf::from("/tmp/net.d"));
        assert!(!config.chained_cni_plugin);
        assert_eq!(
            config.cni_bin_target_dirs,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert_eq!(config.kubeconfig_mode, 0o640);
        assert_eq!(config.k8s_service_host.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.k8s_service_port, Some(6443));
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cnid.toml");
        std::fs::write(&path, "cni_conf_name = \"10-a.conf\"\nlog_level = \"warn\"\n").unwrap();

        let path_str = path.display().to_string();
        let args = parse(&["--config", &path_str, "--cni-conf-name", "20-b.conflist"]);
        let config = args.install_config().unwrap();

        assert_eq!(config.cni_conf_name.as_deref(), Some("20-b.conflist"));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = parse(&["--k8s-service-protocol", "gopher"]);
        assert!(args.install_config().is_err());
    }

    #[test]
    fn test_log_config() {
        let args = parse(&["--log-format", "json", "-v"]);
        let config = args.log_config().unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.ansi);

        let args = parse(&["--log-format", "yaml"]);
        assert!(args.log_config().is_err());
    }
}
