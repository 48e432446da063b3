//! End-to-end install loop tests against temp directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cnid_config::InstallConfig;
use cnid_install::{InstallError, Installer, Readiness, document};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(15);

struct Node {
    _root: TempDir,
    net_dir: PathBuf,
    bin_dir: PathBuf,
    config: InstallConfig,
}

impl Node {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let net_dir = root.path().join("net.d");
        let bin_src = root.path().join("image-bin");
        let bin_dir = root.path().join("host-bin");
        let sa_dir = root.path().join("serviceaccount");
        for d in [&net_dir, &bin_src, &sa_dir] {
            std::fs::create_dir_all(d).unwrap();
        }
        std::fs::write(bin_src.join("istio-cni"), "cni").unwrap();
        std::fs::write(bin_src.join("istio-iptables"), "iptables").unwrap();
        std::fs::write(sa_dir.join("token"), "token-1\n").unwrap();

        let config = InstallConfig {
            mounted_cni_net_dir: net_dir.clone(),
            cni_bin_source_dir: bin_src,
            cni_bin_target_dirs: vec![bin_dir.clone()],
            service_account_dir: sa_dir,
            k8s_service_host: Some("10.96.0.1".to_owned()),
            k8s_service_port: Some(443),
            skip_tls_verify: true,
            ..Default::default()
        };

        Self {
            _root: root,
            net_dir,
            bin_dir,
            config,
        }
    }

    fn write_conf(&self, name: &str, content: &str) -> PathBuf {
        let path = self.net_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn has_managed_plugin(path: &Path) -> bool {
    document::load(path)
        .ok()
        .and_then(|doc| document::find_plugin(&doc, "istio-cni").ok().flatten())
        .is_some()
}

fn plugin_types(path: &Path) -> Vec<String> {
    let doc = document::load(path).unwrap();
    document::plugins(&doc)
        .unwrap()
        .iter()
        .map(|p| p["type"].as_str().unwrap().to_owned())
        .collect()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn spawn(
    config: InstallConfig,
    readiness: &Readiness,
    cancel: &CancellationToken,
) -> JoinHandle<(Installer, Result<(), InstallError>)> {
    let mut installer = Installer::new(config, readiness.clone());
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let res = installer.run(&cancel).await;
        (installer, res)
    })
}

#[tokio::test]
async fn test_chained_install_self_heals_and_cleans_up() {
    let node = Node::new();
    let conf = node.write_conf(
        "10-calico.conflist",
        r#"{"cniVersion":"0.3.1","name":"k8s-pod-network","plugins":[{"type":"calico"},{"type":"portmap"}]}"#,
    );

    let readiness = Readiness::new();
    let cancel = CancellationToken::new();
    let task = spawn(node.config.clone(), &readiness, &cancel);

    wait_until(|| readiness.is_ready()).await;
    assert_eq!(plugin_types(&conf), vec!["calico", "portmap", "istio-cni"]);
    assert!(node.bin_dir.join("istio-cni").exists());
    assert!(node.net_dir.join("ZZZ-istio-cni-kubeconfig").exists());

    // A competing installer strips the entry.
    std::fs::write(
        &conf,
        r#"{"cniVersion":"0.3.1","name":"k8s-pod-network","plugins":[{"type":"calico"},{"type":"portmap"}]}"#,
    )
    .unwrap();

    wait_until(|| !readiness.is_ready() || !has_managed_plugin(&conf)).await;
    wait_until(|| readiness.is_ready() && has_managed_plugin(&conf)).await;
    assert_eq!(plugin_types(&conf), vec!["calico", "portmap", "istio-cni"]);

    cancel.cancel();
    let (installer, res) = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(res, Err(InstallError::Cancelled)));
    assert!(!installer.readiness().is_ready());
    assert!(installer.config().chained_cni_plugin);

    let kubeconfig = installer.kubeconfig_path().unwrap().to_path_buf();
    assert_eq!(kubeconfig, node.net_dir.join("ZZZ-istio-cni-kubeconfig"));
    installer.cleanup().unwrap();
    assert_eq!(plugin_types(&conf), vec!["calico", "portmap"]);
    assert!(!kubeconfig.exists());
    assert!(!node.bin_dir.join("istio-cni").exists());
    assert!(!node.bin_dir.join("istio-iptables").exists());
}

#[tokio::test]
async fn test_preempting_config_gets_the_plugin() {
    let node = Node::new();
    node.write_conf("10-calico.conflist", r#"{"plugins":[{"type":"calico"}]}"#);

    let readiness = Readiness::new();
    let cancel = CancellationToken::new();
    let task = spawn(node.config.clone(), &readiness, &cancel);

    wait_until(|| readiness.is_ready()).await;

    let winner = node.write_conf("05-cilium.conflist", r#"{"plugins":[{"type":"cilium"}]}"#);
    wait_until(|| readiness.is_ready() && has_managed_plugin(&winner)).await;
    assert_eq!(plugin_types(&winner), vec!["cilium", "istio-cni"]);

    cancel.cancel();
    let (installer, _) = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(installer.cni_config_path(), Some(winner.as_path()));
}

#[tokio::test]
async fn test_standalone_install_and_cleanup() {
    let node = Node::new();
    let config = InstallConfig {
        chained_cni_plugin: false,
        ..node.config.clone()
    };

    let readiness = Readiness::new();
    let cancel = CancellationToken::new();
    let task = spawn(config, &readiness, &cancel);

    wait_until(|| readiness.is_ready()).await;
    let conf = node.net_dir.join("YY-istio-cni.conf");
    let doc = document::load(&conf).unwrap();
    assert_eq!(doc["type"], "istio-cni");

    cancel.cancel();
    let (installer, _) = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    installer.cleanup().unwrap();
    assert!(!conf.exists());
}

#[tokio::test]
async fn test_missing_token_is_fatal() {
    let node = Node::new();
    std::fs::remove_file(node.config.token_path()).unwrap();
    node.write_conf("10-calico.conflist", r#"{"plugins":[{"type":"calico"}]}"#);

    let readiness = Readiness::new();
    let mut installer = Installer::new(node.config.clone(), readiness.clone());
    let err = tokio::time::timeout(TIMEOUT, installer.run(&CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, InstallError::NoServiceAccountToken(_)));
    assert!(!readiness.is_ready());
    installer.cleanup().unwrap();
}

#[tokio::test]
async fn test_missing_binary_source_is_fatal() {
    let node = Node::new();
    let config = InstallConfig {
        cni_bin_source_dir: node.net_dir.join("nope"),
        ..node.config.clone()
    };

    let mut installer = Installer::new(config, Readiness::new());
    let err = installer.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, InstallError::Io { .. }));
}
