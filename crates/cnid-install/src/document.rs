//! CNI config documents and the plugin list editor.
//!
//! A [`ConfigDocument`] is an insertion-ordered JSON object. In chained mode
//! its `plugins` key holds an ordered list of plugin entries, each an object
//! with a `type`. The editor functions here only ever touch the managed
//! entry; every other entry keeps its position relative to its neighbours.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{InstallError, InstallResult};
use crate::fs_util;

/// An insertion-ordered CNI config object.
pub type ConfigDocument = Map<String, Value>;

/// Key holding the plugin chain.
pub const PLUGINS_KEY: &str = "plugins";

/// Key naming a plugin entry's type.
pub const TYPE_KEY: &str = "type";

/// How [`upsert_plugin`] treats an existing entry of the same type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// Overwrite the existing entry in place, or append if there is none.
    #[default]
    Replace,
    /// Always append, leaving any existing entry alone.
    Append,
}

/// Parse raw file content into a document.
///
/// # Errors
///
/// Returns [`InstallError::Parse`] for invalid JSON and
/// [`InstallError::NotAMapping`] when the top level is not an object.
pub fn parse(bytes: &[u8], path: &Path) -> InstallResult<ConfigDocument> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| InstallError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(InstallError::NotAMapping(path.to_path_buf())),
    }
}

/// Read and parse a document from disk.
///
/// # Errors
///
/// Returns [`InstallError::Io`] if the file cannot be read, otherwise see [`parse`].
pub fn load(path: &Path) -> InstallResult<ConfigDocument> {
    let bytes = std::fs::read(path).map_err(|e| InstallError::io(path, e))?;
    parse(&bytes, path)
}

/// Serialize a document and atomically replace `path` with it.
///
/// # Errors
///
/// Returns an error if serialization or the atomic write fails.
pub fn save(path: &Path, doc: &ConfigDocument, mode: u32) -> InstallResult<()> {
    let mut bytes = serde_json::to_vec_pretty(doc).map_err(|e| InstallError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    bytes.push(b'\n');
    fs_util::atomic_write(path, &bytes, mode)
}

/// Borrow the plugin list.
///
/// # Errors
///
/// Returns [`InstallError::MissingPlugins`] or [`InstallError::PluginsNotSequence`].
pub fn plugins(doc: &ConfigDocument) -> InstallResult<&Vec<Value>> {
    match doc.get(PLUGINS_KEY) {
        None => Err(InstallError::MissingPlugins),
        Some(Value::Array(list)) => Ok(list),
        Some(_) => Err(InstallError::PluginsNotSequence),
    }
}

fn plugins_mut(doc: &mut ConfigDocument) -> InstallResult<&mut Vec<Value>> {
    match doc.get_mut(PLUGINS_KEY) {
        None => Err(InstallError::MissingPlugins),
        Some(Value::Array(list)) => Ok(list),
        Some(_) => Err(InstallError::PluginsNotSequence),
    }
}

/// Read the `type` of a plugin entry. An object without a string `type`
/// yields `None`.
///
/// # Errors
///
/// Returns [`InstallError::PluginNotMapping`] if the entry is not an object.
pub fn entry_type(entry: &Value, index: usize) -> InstallResult<Option<&str>> {
    let Value::Object(map) = entry else {
        return Err(InstallError::PluginNotMapping { index });
    };
    Ok(map.get(TYPE_KEY).and_then(Value::as_str))
}

/// Position of the first plugin entry of type `plugin_type`.
///
/// # Errors
///
/// Fails on a missing or malformed plugin list, or a non-object entry
/// encountered before a match.
pub fn find_plugin(doc: &ConfigDocument, plugin_type: &str) -> InstallResult<Option<usize>> {
    for (index, entry) in plugins(doc)?.iter().enumerate() {
        if entry_type(entry, index)? == Some(plugin_type) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Insert `entry` into the plugin list according to `policy`.
///
/// Returns the index the entry now occupies.
///
/// # Errors
///
/// Fails on a missing or malformed plugin list, or when `entry` has no
/// `type`.
pub fn upsert_plugin(
    doc: &mut ConfigDocument,
    entry: ConfigDocument,
    policy: MergePolicy,
) -> InstallResult<usize> {
    let Some(plugin_type) = entry.get(TYPE_KEY).and_then(Value::as_str).map(str::to_owned) else {
        return Err(InstallError::Template(
            "plugin entry has no \"type\" field".to_owned(),
        ));
    };

    // Every entry must be a mapping regardless of policy.
    for (index, current) in plugins(doc)?.iter().enumerate() {
        entry_type(current, index)?;
    }
    let existing = match policy {
        MergePolicy::Replace => find_plugin(doc, &plugin_type)?,
        MergePolicy::Append => None,
    };

    let list = plugins_mut(doc)?;
    if let Some(index) = existing {
        list[index] = Value::Object(entry);
        Ok(index)
    } else {
        list.push(Value::Object(entry));
        Ok(list.len().saturating_sub(1))
    }
}

/// Remove the first plugin entry of type `plugin_type`.
///
/// Returns the removed entry, or `None` when nothing matched (not an error).
/// Later duplicates are left untouched.
///
/// # Errors
///
/// Fails on a missing or malformed plugin list, or a non-object entry
/// encountered before a match.
pub fn remove_plugin(doc: &mut ConfigDocument, plugin_type: &str) -> InstallResult<Option<Value>> {
    let Some(index) = find_plugin(doc, plugin_type)? else {
        return Ok(None);
    };
    Ok(Some(plugins_mut(doc)?.remove(index)))
}
