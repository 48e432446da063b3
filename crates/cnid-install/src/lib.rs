//! Install, verify and watch loop for a chained CNI plugin configuration.
//!
//! The [`Installer`] copies plugin binaries onto the host, renders a
//! kubeconfig and a CNI config fragment into the host's CNI net directory,
//! and then watches that directory. Any external change that invalidates the
//! installed fragment flips the shared [`Readiness`] signal to not-ready and
//! restarts the install cycle from scratch.
//!
//! # Architecture
//!
//! ```text
//! Installer::run
//!   → copy_binaries → read_service_account_token → create_kubeconfig_file
//!   → create_cni_config_file (document::upsert_plugin for chains)
//!   → sleep_check_install
//!       DirectoryWatcher::new  (before any check)
//!       loop: check_install → poll_pending → mark_ready → wait_for_modification
//!   → drift: "Restarting..." and loop again
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod binaries;
pub mod check;
pub mod cni_conf;
pub mod document;
pub mod error;
pub mod fs_util;
pub mod installer;
pub mod kubeconfig;
pub mod readiness;
pub mod token;
pub mod watcher;

pub use check::check_install;
pub use document::{ConfigDocument, MergePolicy};
pub use error::{Drift, InstallError, InstallResult};
pub use installer::{Installer, sleep_check_install};
pub use readiness::Readiness;
pub use watcher::{DirectoryWatcher, poll_pending, wait_for_modification};
