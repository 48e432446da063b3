//! Kubeconfig rendering for the plugin binary.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cnid_config::InstallConfig;
use serde::Serialize;
use tracing::info;

use crate::error::{InstallError, InstallResult};
use crate::fs_util;

const CLUSTER_NAME: &str = "local";
const USER_NAME: &str = "istio-cni";
const CONTEXT_NAME: &str = "istio-cni-context";

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<Named<Cluster>>,
    users: Vec<Named<User>>,
    contexts: Vec<Named<Context>>,
    current_context: &'static str,
}

#[derive(Debug, Serialize)]
struct Named<T> {
    name: &'static str,
    #[serde(flatten)]
    inner: T,
}

#[derive(Debug, Serialize)]
struct Cluster {
    cluster: ClusterInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterInfo {
    server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate_authority_data: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Serialize)]
struct User {
    user: UserInfo,
}

#[derive(Debug, Serialize)]
struct UserInfo {
    token: String,
}

#[derive(Debug, Serialize)]
struct Context {
    context: ContextInfo,
}

#[derive(Debug, Serialize)]
struct ContextInfo {
    cluster: &'static str,
    user: &'static str,
}

/// API server URL from the configured protocol, host and port.
///
/// # Errors
///
/// Returns [`InstallError::Kubeconfig`] if host or port is unset.
pub fn server_url(config: &InstallConfig) -> InstallResult<String> {
    let host = config
        .k8s_service_host
        .as_deref()
        .ok_or_else(|| InstallError::Kubeconfig("KUBERNETES_SERVICE_HOST not set".to_owned()))?;
    let port = config
        .k8s_service_port
        .ok_or_else(|| InstallError::Kubeconfig("KUBERNETES_SERVICE_PORT not set".to_owned()))?;

    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    Ok(format!("{}://{host}:{port}", config.k8s_service_protocol))
}

/// Render the kubeconfig YAML for `token`.
///
/// # Errors
///
/// Returns [`InstallError::Kubeconfig`] if the server address is incomplete or
/// serialization fails, and [`InstallError::Io`] if the CA file cannot be read.
pub fn render_kubeconfig(config: &InstallConfig, token: &str) -> InstallResult<String> {
    let certificate_authority_data = if config.skip_tls_verify {
        None
    } else {
        let ca_path = config
            .kube_ca_file
            .clone()
            .unwrap_or_else(|| config.service_account_dir.join("ca.crt"));
        let ca = std::fs::read(&ca_path).map_err(|e| InstallError::io(&ca_path, e))?;
        Some(STANDARD.encode(ca))
    };

    let doc = Kubeconfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![Named {
            name: CLUSTER_NAME,
            inner: Cluster {
                cluster: ClusterInfo {
                    server: server_url(config)?,
                    certificate_authority_data,
                    insecure_skip_tls_verify: config.skip_tls_verify,
                },
            },
        }],
        users: vec![Named {
            name: USER_NAME,
            inner: User {
                user: UserInfo {
                    token: token.to_owned(),
                },
            },
        }],
        contexts: vec![Named {
            name: CONTEXT_NAME,
            inner: Context {
                context: ContextInfo {
                    cluster: CLUSTER_NAME,
                    user: USER_NAME,
                },
            },
        }],
        current_context: CONTEXT_NAME,
    };

    serde_yaml::to_string(&doc).map_err(|e| InstallError::Kubeconfig(e.to_string()))
}

/// Render and atomically write the kubeconfig into the mounted net directory.
///
/// # Errors
///
/// See [`render_kubeconfig`]; write failures are [`InstallError::Io`].
pub fn create_kubeconfig_file(config: &InstallConfig, token: &str) -> InstallResult<PathBuf> {
    let content = render_kubeconfig(config, token)?;
    let path = config.mounted_cni_net_dir.join(&config.kubeconfig_filename);
    fs_util::atomic_write(&path, content.as_bytes(), config.kubeconfig_mode)?;
    info!(path = %path.display(), "Wrote kubeconfig file");
    Ok(path)
}
