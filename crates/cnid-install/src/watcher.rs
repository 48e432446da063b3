//! Directory watcher over the CNI net directory.
//!
//! ```text
//! filesystem events (notify, backend thread)
//!   → drop access-only events
//!   → try_send(()) into a capacity-1 modification channel
//!   → consumer: poll_pending (non-blocking) / wait_for_modification (blocking)
//! ```
//!
//! The modification channel holds at most one notification. A full channel
//! already tells the consumer "something changed", so further events are
//! coalesced into it without loss of meaning.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{InstallError, InstallResult};

/// Receives one `()` per batch of modifications.
pub type ModificationRx = mpsc::Receiver<()>;

/// Receives backend watcher errors.
pub type WatchErrorRx = mpsc::Receiver<String>;

const ERROR_CHANNEL_CAPACITY: usize = 8;

/// Handle keeping a non-recursive watch on one directory alive.
///
/// Dropping or [closing](Self::close) the handle stops monitoring and closes
/// both channels.
pub struct DirectoryWatcher {
    dir: PathBuf,
    /// The `notify` backend. Dropping it stops the watch.
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl DirectoryWatcher {
    /// Start watching `dir`.
    ///
    /// Events that occur after this returns are guaranteed to reach the
    /// returned modification channel.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Watcher`] if the backend cannot be created or
    /// the directory cannot be watched.
    pub fn new(dir: &Path) -> InstallResult<(Self, ModificationRx, WatchErrorRx)> {
        let (mod_tx, mod_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_modification(&event.kind) {
                        // Full means a notification is already pending.
                        let _ = mod_tx.try_send(());
                    }
                },
                Err(e) => {
                    let _ = err_tx.try_send(e.to_string());
                },
            },
            notify::Config::default(),
        )
        .map_err(|e| InstallError::Watcher(format!("failed to create watcher: {e}")))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                InstallError::Watcher(format!("failed to watch {}: {e}", dir.display()))
            })?;

        debug!(dir = %dir.display(), "Watching directory");
        Ok((
            Self {
                dir: dir.to_path_buf(),
                _watcher: watcher,
            },
            mod_rx,
            err_rx,
        ))
    }

    /// Directory being watched.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop watching.
    pub fn close(self) {
        debug!(dir = %self.dir.display(), "Closing directory watcher");
    }
}

fn is_modification(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Block until a modification, a watcher error, or cancellation.
///
/// # Errors
///
/// Returns [`InstallError::Cancelled`] on cancellation and
/// [`InstallError::Watcher`] on a backend error or a closed channel.
pub async fn wait_for_modification(
    cancel: &CancellationToken,
    mods: &mut ModificationRx,
    errors: &mut WatchErrorRx,
) -> InstallResult<()> {
    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(InstallError::Cancelled),

        m = mods.recv() => match m {
            Some(()) => Ok(()),
            None => Err(InstallError::Watcher("modification channel closed".to_owned())),
        },

        e = errors.recv() => match e {
            Some(msg) => {
                warn!(error = %msg, "Directory watcher error");
                Err(InstallError::Watcher(msg))
            },
            None => Err(InstallError::Watcher("error channel closed".to_owned())),
        },
    }
}

/// Non-blocking check for anything [`wait_for_modification`] would return.
///
/// Returns `None` when nothing is pending and the token is not cancelled.
pub fn poll_pending(
    cancel: &CancellationToken,
    mods: &mut ModificationRx,
    errors: &mut WatchErrorRx,
) -> Option<InstallResult<()>> {
    match mods.try_recv() {
        Ok(()) => return Some(Ok(())),
        Err(TryRecvError::Disconnected) => {
            return Some(Err(InstallError::Watcher(
                "modification channel closed".to_owned(),
            )));
        },
        Err(TryRecvError::Empty) => {},
    }

    match errors.try_recv() {
        Ok(msg) => {
            warn!(error = %msg, "Directory watcher error");
            return Some(Err(InstallError::Watcher(msg)));
        },
        Err(TryRecvError::Disconnected) => {
            return Some(Err(InstallError::Watcher("error channel closed".to_owned())));
        },
        Err(TryRecvError::Empty) => {},
    }

    if cancel.is_cancelled() {
        return Some(Err(InstallError::Cancelled));
    }

    None
}
