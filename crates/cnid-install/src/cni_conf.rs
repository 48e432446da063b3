//! CNI network config selection and fragment rendering.

use std::path::{Path, PathBuf};

use cnid_config::{
    CNI_CONF_EXTENSIONS, DEFAULT_STANDALONE_CONF_NAME, InstallConfig, MANAGED_PLUGIN_TYPE,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::document::{self, ConfigDocument, MergePolicy, PLUGINS_KEY, TYPE_KEY};
use crate::error::{InstallError, InstallResult};
use crate::fs_util;
use crate::watcher::{DirectoryWatcher, wait_for_modification};

/// Mode of written CNI config files.
pub const CNI_CONF_MODE: u32 = 0o644;

/// CNI spec version stamped on documents this crate creates.
pub const CNI_VERSION: &str = "0.3.1";

/// Network name used when converting a `.conf` that has none.
const FALLBACK_NETWORK_NAME: &str = "k8s-pod-network";

/// Pick the file the container runtime uses as the default network.
///
/// Candidates are files with a CNI extension, taken in lexicographic order;
/// the first that is a valid network config wins.
///
/// # Errors
///
/// Returns [`InstallError::Io`] if the directory cannot be read and
/// [`InstallError::NoDefaultNetwork`] if no candidate is valid.
pub fn default_network(dir: &Path) -> InstallResult<PathBuf> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| InstallError::io(dir, e))? {
        let entry = entry.map_err(|e| InstallError::io(dir, e))?;
        let path = entry.path();
        if has_cni_extension(&path) && path.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();

    for path in candidates {
        if is_valid_network_config(&path) {
            return Ok(path);
        }
        debug!(path = %path.display(), "Skipping invalid network config candidate");
    }

    Err(InstallError::NoDefaultNetwork(dir.to_path_buf()))
}

fn has_cni_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| CNI_CONF_EXTENSIONS.contains(&e))
}

fn is_conf_list(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("conflist")
}

fn is_valid_network_config(path: &Path) -> bool {
    let Ok(doc) = document::load(path) else {
        return false;
    };
    if is_conf_list(path) {
        document::plugins(&doc).is_ok_and(|list| !list.is_empty())
    } else {
        doc.get(TYPE_KEY)
            .and_then(Value::as_str)
            .is_some_and(|t| !t.is_empty())
    }
}

/// Host-side path of the kubeconfig the plugin reads.
#[must_use]
pub fn host_kubeconfig_path(config: &InstallConfig) -> PathBuf {
    config.host_cni_net_dir.join(&config.kubeconfig_filename)
}

/// Build the managed plugin entry.
///
/// Uses `cni_network_config` as a template when set, otherwise a typed
/// default entry.
///
/// # Errors
///
/// Returns [`InstallError::Template`] if the template leaves a placeholder
/// unresolved, is not a JSON object, or does not declare the managed type.
pub fn plugin_entry(config: &InstallConfig, token: &str) -> InstallResult<ConfigDocument> {
    match config.cni_network_config.as_deref() {
        Some(template) => render_template(template, config, token),
        None => Ok(default_entry(config)),
    }
}

fn default_entry(config: &InstallConfig) -> ConfigDocument {
    let mut entry = ConfigDocument::new();
    entry.insert(TYPE_KEY.to_owned(), json!(MANAGED_PLUGIN_TYPE));
    entry.insert("log_level".to_owned(), json!(config.log_level));
    if let Some(addr) = &config.log_uds_address {
        entry.insert("log_uds_address".to_owned(), json!(addr));
    }
    entry.insert(
        "kubernetes".to_owned(),
        json!({
            "kubeconfig": host_kubeconfig_path(config).display().to_string(),
            "cni_bin_dir": config.primary_bin_dir().display().to_string(),
            "exclude_namespaces": config.exclude_namespaces,
        }),
    );
    entry
}

fn render_template(
    template: &str,
    config: &InstallConfig,
    token: &str,
) -> InstallResult<ConfigDocument> {
    let replacements = [
        (
            "__KUBECONFIG_FILEPATH__",
            host_kubeconfig_path(config).display().to_string(),
        ),
        ("__KUBECONFIG_FILENAME__", config.kubeconfig_filename.clone()),
        ("__LOG_LEVEL__", config.log_level.clone()),
        (
            "__LOG_UDS_ADDRESS__",
            config.log_uds_address.clone().unwrap_or_default(),
        ),
        ("__CNI_BIN_DIR__", config.primary_bin_dir().display().to_string()),
        ("__SERVICEACCOUNT_TOKEN__", token.to_owned()),
    ];

    let mut text = template.to_owned();
    for (placeholder, value) in &replacements {
        text = text.replace(placeholder, value);
    }

    if let Some(left) = unresolved_placeholder(&text) {
        return Err(InstallError::Template(format!("unknown placeholder {left}")));
    }

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| InstallError::Template(format!("not valid JSON after substitution: {e}")))?;
    let Value::Object(entry) = value else {
        return Err(InstallError::Template("must be a JSON object".to_owned()));
    };

    match entry.get(TYPE_KEY).and_then(Value::as_str) {
        Some(MANAGED_PLUGIN_TYPE) => Ok(entry),
        other => Err(InstallError::Template(format!(
            "\"type\" must be \"{MANAGED_PLUGIN_TYPE}\", found {other:?}"
        ))),
    }
}

/// First `__UPPER_CASE__` token left in `text`.
fn unresolved_placeholder(text: &str) -> Option<&str> {
    let mut rest = text;
    let mut offset: usize = 0;
    while let Some(start) = rest.find("__") {
        let body_start = start.saturating_add(2);
        let body = &rest[body_start..];
        let len = body
            .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
            .unwrap_or(body.len());
        let name = &body[..len];
        if let Some(end) = name.find("__") {
            if end > 0 {
                let abs = offset.saturating_add(start);
                let total = end.saturating_add(4);
                return Some(&text[abs..abs.saturating_add(total)]);
            }
        }
        offset = offset.saturating_add(body_start);
        rest = body;
    }
    None
}

/// Resolve `path` to the file actually holding the chain: a `.conf` that
/// was converted on an earlier cycle lives on as a `.conflist` sibling.
fn existing_chain_file(path: &Path) -> Option<PathBuf> {
    if path.extension().and_then(|e| e.to_str()) == Some("conf") {
        let list = path.with_extension("conflist");
        if fs_util::file_exists(&list) {
            return Some(list);
        }
    }
    fs_util::file_exists(path).then(|| path.to_path_buf())
}

fn find_chain_target(config: &InstallConfig) -> InstallResult<Option<PathBuf>> {
    let dir = &config.mounted_cni_net_dir;
    match config.cni_conf_name.as_deref() {
        Some(name) => Ok(existing_chain_file(&dir.join(name))),
        None => match default_network(dir) {
            Ok(path) => Ok(existing_chain_file(&path)),
            Err(InstallError::NoDefaultNetwork(_)) => Ok(None),
            Err(e) => Err(e),
        },
    }
}

/// Wait until the primary network config to chain onto exists.
///
/// # Errors
///
/// Returns [`InstallError::Cancelled`] on cancellation, or any watcher or
/// directory read failure.
pub async fn wait_for_chain_target(
    cancel: &CancellationToken,
    config: &InstallConfig,
) -> InstallResult<PathBuf> {
    let dir = &config.mounted_cni_net_dir;
    let (watcher, mut mods, mut errors) = DirectoryWatcher::new(dir)?;

    let result = loop {
        match find_chain_target(config) {
            Ok(Some(path)) => break Ok(path),
            Ok(None) => {},
            Err(e) => break Err(e),
        }
        info!(dir = %dir.display(), "Waiting for a primary network config to chain onto");
        if let Err(e) = wait_for_modification(cancel, &mut mods, &mut errors).await {
            break Err(e);
        }
    };

    watcher.close();
    result
}

/// Wrap a single-plugin document in a plugin list.
fn into_conf_list(mut conf: ConfigDocument) -> ConfigDocument {
    let version = conf
        .remove("cniVersion")
        .unwrap_or_else(|| json!(CNI_VERSION));
    let name = conf
        .remove("name")
        .unwrap_or_else(|| json!(FALLBACK_NETWORK_NAME));

    let mut list = ConfigDocument::new();
    list.insert("cniVersion".to_owned(), version);
    list.insert("name".to_owned(), name);
    list.insert(PLUGINS_KEY.to_owned(), Value::Array(vec![Value::Object(conf)]));
    list
}

/// Merge `entry` into the chain at `target`. Returns the file written.
///
/// # Errors
///
/// Fails if the target cannot be read, parsed or rewritten.
pub fn insert_into_chain(target: &Path, entry: ConfigDocument) -> InstallResult<PathBuf> {
    let existing = document::load(target)?;

    let (mut doc, path) = if existing.contains_key(PLUGINS_KEY) {
        (existing, target.to_path_buf())
    } else {
        info!(path = %target.display(), "Converting single-plugin config to a plugin list");
        (into_conf_list(existing), target.with_extension("conflist"))
    };

    document::upsert_plugin(&mut doc, entry, MergePolicy::Replace)?;
    document::save(&path, &doc, CNI_CONF_MODE)?;

    if path != target {
        fs_util::remove_if_exists(target)?;
    }
    Ok(path)
}

/// Render the managed plugin into the net directory. Returns the file written.
///
/// Chained mode merges into the primary network config, waiting for one to
/// appear. Standalone mode writes a dedicated file.
///
/// # Errors
///
/// Propagates template, watcher, parse and filesystem errors.
pub async fn create_cni_config_file(
    cancel: &CancellationToken,
    config: &InstallConfig,
    token: &str,
) -> InstallResult<PathBuf> {
    let entry = plugin_entry(config, token)?;

    let path = if config.chained_cni_plugin {
        let target = wait_for_chain_target(cancel, config).await?;
        insert_into_chain(&target, entry)?
    } else {
        let name = config
            .cni_conf_name
            .as_deref()
            .unwrap_or(DEFAULT_STANDALONE_CONF_NAME);
        let path = config.mounted_cni_net_dir.join(name);

        let mut doc = ConfigDocument::new();
        doc.insert("cniVersion".to_owned(), json!(CNI_VERSION));
        doc.insert("name".to_owned(), json!(MANAGED_PLUGIN_TYPE));
        doc.extend(entry);
        document::save(&path, &doc, CNI_CONF_MODE)?;
        path
    };

    info!(path = %path.display(), chained = config.chained_cni_plugin, "Wrote CNI config");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config(dir: &Path) -> InstallConfig {
        InstallConfig {
            mounted_cni_net_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_network_lexicographic_first_valid() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "30-late.conf", r#"{"type":"bridge"}"#);
        write(dir.path(), "05-broken.conflist", r#"{"plugins":[]}"#);
        write(dir.path(), "00-notes.txt", "ignored");
        let winner = write(dir.path(), "10-calico.conflist", r#"{"plugins":[{"type":"calico"}]}"#);

        assert_eq!(default_network(dir.path()).unwrap(), winner);
    }

    #[test]
    fn test_default_network_none() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "10-empty.conf", r#"{"name":"x"}"#);
        assert!(matches!(
            default_network(dir.path()),
            Err(InstallError::NoDefaultNetwork(_))
        ));
    }

    #[test]
    fn test_default_entry_shape() {
        let cfg = InstallConfig {
            exclude_namespaces: vec!["kube-system".to_owned()],
            ..Default::default()
        };
        let entry = plugin_entry(&cfg, "t").unwrap();
        assert_eq!(entry["type"], "istio-cni");
        assert_eq!(
            entry["kubernetes"]["kubeconfig"],
            "/etc/cni/net.d/ZZZ-istio-cni-kubeconfig"
        );
        assert_eq!(entry["kubernetes"]["cni_bin_dir"], "/host/opt/cni/bin");
        assert_eq!(entry["kubernetes"]["exclude_namespaces"][0], "kube-system");
        assert!(!entry.contains_key("log_uds_address"));
    }

    #[test]
    fn test_template_substitution() {
        let cfg = InstallConfig {
            cni_network_config: Some(
                r#"{"type":"istio-cni","log_level":"__LOG_LEVEL__","kubernetes":{"kubeconfig":"__KUBECONFIG_FILEPATH__"}}"#
                    .to_owned(),
            ),
            log_level: "debug".to_owned(),
            ..Default::default()
        };
        let entry = plugin_entry(&cfg, "t").unwrap();
        assert_eq!(entry["log_level"], "debug");
        assert_eq!(
            entry["kubernetes"]["kubeconfig"],
            "/etc/cni/net.d/ZZZ-istio-cni-kubeconfig"
        );
    }

    #[test]
    fn test_template_errors_are_returned() {
        let unknown = InstallConfig {
            cni_network_config: Some(r#"{"type":"istio-cni","x":"__MYSTERY__"}"#.to_owned()),
            ..Default::default()
        };
        let err = plugin_entry(&unknown, "t").unwrap_err();
        assert!(err.to_string().contains("__MYSTERY__"));

        let not_json = InstallConfig {
            cni_network_config: Some("{".to_owned()),
            ..Default::default()
        };
        assert!(matches!(plugin_entry(&not_json, "t"), Err(InstallError::Template(_))));

        let wrong_type = InstallConfig {
            cni_network_config: Some(r#"{"type":"bridge"}"#.to_owned()),
            ..Default::default()
        };
        assert!(matches!(plugin_entry(&wrong_type, "t"), Err(InstallError::Template(_))));
    }

    #[test]
    fn test_unresolved_placeholder_scan() {
        assert_eq!(unresolved_placeholder("a __FOO_BAR__ b"), Some("__FOO_BAR__"));
        assert_eq!(unresolved_placeholder("snake__case and ____"), None);
        assert_eq!(unresolved_placeholder("plain"), None);
        assert_eq!(unresolved_placeholder("x_y __ __A__ then __B__"), Some("__A__"));
    }

    #[test]
    fn test_insert_into_existing_list() {
        let dir = TempDir::new().unwrap();
        let target = write(
            dir.path(),
            "10-calico.conflist",
            r#"{"name":"k8s","plugins":[{"type":"calico"},{"type":"portmap"}]}"#,
        );
        let entry = plugin_entry(&config(dir.path()), "t").unwrap();

        let written = insert_into_chain(&target, entry).unwrap();
        assert_eq!(written, target);

        let doc = document::load(&written).unwrap();
        let types: Vec<&str> = document::plugins(&doc)
            .unwrap()
            .iter()
            .map(|p| p["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["calico", "portmap", "istio-cni"]);
    }

    #[test]
    fn test_insert_converts_single_conf() {
        let dir = TempDir::new().unwrap();
        let target = write(
            dir.path(),
            "10-bridge.conf",
            r#"{"cniVersion":"0.4.0","name":"mynet","type":"bridge","bridge":"cni0"}"#,
        );
        let entry = plugin_entry(&config(dir.path()), "t").unwrap();

        let written = insert_into_chain(&target, entry).unwrap();
        assert_eq!(written, dir.path().join("10-bridge.conflist"));
        assert!(!target.exists());

        let doc = document::load(&written).unwrap();
        assert_eq!(doc["cniVersion"], "0.4.0");
        assert_eq!(doc["name"], "mynet");
        let list = document::plugins(&doc).unwrap();
        assert_eq!(list[0]["type"], "bridge");
        assert!(list[0].get("name").is_none());
        assert_eq!(list[1]["type"], "istio-cni");
    }

    #[test]
    fn test_converted_conf_resolves_to_list() {
        let dir = TempDir::new().unwrap();
        let list = write(dir.path(), "10-bridge.conflist", r#"{"plugins":[{"type":"bridge"}]}"#);
        assert_eq!(
            existing_chain_file(&dir.path().join("10-bridge.conf")),
            Some(list)
        );
    }

    #[tokio::test]
    async fn test_standalone_file_written() {
        let dir = TempDir::new().unwrap();
        let cfg = InstallConfig {
            chained_cni_plugin: false,
            ..config(dir.path())
        };

        let path = create_cni_config_file(&CancellationToken::new(), &cfg, "t")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("YY-istio-cni.conf"));
        let doc = document::load(&path).unwrap();
        assert_eq!(doc["type"], "istio-cni");
        assert_eq!(doc["cniVersion"], CNI_VERSION);
    }

    #[tokio::test]
    async fn test_chained_wait_is_cancellable() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = create_cni_config_file(&cancel, &cfg, "t").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_chained_waits_for_primary_config() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let cancel = CancellationToken::new();

        let net_dir = dir.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            std::fs::write(
                net_dir.join("10-calico.conflist"),
                r#"{"plugins":[{"type":"calico"}]}"#,
            )
            .unwrap();
        });

        let path = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            create_cni_config_file(&cancel, &cfg, "t"),
        )
        .await
        .expect("primary config never observed")
        .unwrap();
        writer.await.unwrap();

        assert_eq!(path, dir.path().join("10-calico.conflist"));
        let doc = document::load(&path).unwrap();
        assert!(document::find_plugin(&doc, MANAGED_PLUGIN_TYPE).unwrap().is_some());
    }
}
