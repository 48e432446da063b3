//! Installer error and drift types.

use std::fmt;
use std::path::PathBuf;

/// Errors that abort the install loop.
///
/// Drift is deliberately not represented here; see [`Drift`].
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was applied to.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The service-account token is not mounted; not running inside a pod.
    #[error("service account token not found at {0}; not running in a Kubernetes pod?")]
    NoServiceAccountToken(PathBuf),

    /// A CNI config file is not valid JSON.
    #[error("failed to parse CNI config {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The document has no `plugins` key.
    #[error("CNI config has no \"plugins\" list")]
    MissingPlugins,

    /// The `plugins` key is present but is not a sequence.
    #[error("CNI config \"plugins\" is not a list")]
    PluginsNotSequence,

    /// A plugin list entry is not an object.
    #[error("plugin entry {index} is not an object")]
    PluginNotMapping {
        /// Position of the offending entry.
        index: usize,
    },

    /// A CNI config file's top level is not an object.
    #[error("CNI config {0} is not a JSON object")]
    NotAMapping(PathBuf),

    /// No valid network config exists in the directory.
    #[error("no valid network config found in {0}")]
    NoDefaultNetwork(PathBuf),

    /// The plugin entry template is invalid.
    #[error("invalid CNI network config template: {0}")]
    Template(String),

    /// The kubeconfig could not be rendered.
    #[error("failed to render kubeconfig: {0}")]
    Kubeconfig(String),

    /// The directory watcher failed or could not be created.
    #[error("directory watcher error: {0}")]
    Watcher(String),

    /// The cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl InstallError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the cancellation signal rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A specialized Result type for installer operations.
pub type InstallResult<T> = Result<T, InstallError>;

/// An external change that invalidated the installed configuration.
///
/// Drift is expected and recoverable: the installer logs it and reinstalls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// Another file now sorts first in the net directory.
    Preempted {
        /// The fragment this cycle installed.
        expected: PathBuf,
        /// The file the runtime now selects.
        found: PathBuf,
    },
    /// The installed fragment no longer exists.
    Removed(PathBuf),
    /// The managed plugin entry is gone from the chain.
    PluginRemoved(PathBuf),
    /// The standalone fragment's type was changed.
    Modified(PathBuf),
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preempted { expected, found } => write!(
                f,
                "CNI config file {} preempted by {}",
                expected.display(),
                found.display()
            ),
            Self::Removed(path) => write!(f, "CNI config file {} removed", path.display()),
            Self::PluginRemoved(path) => write!(
                f,
                "istio-cni CNI config removed from CNI config file {}",
                path.display()
            ),
            Self::Modified(path) => {
                write!(f, "istio-cni CNI config file {} modified", path.display())
            },
        }
    }
}
