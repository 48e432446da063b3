//! Readiness signal shared with the health probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Whether the installed CNI configuration is currently verified.
///
/// One writer (the installer) and any number of readers; last write wins and
/// neither side ever blocks the other. Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    /// Create a signal that starts out not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the node ready.
    pub fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            debug!("Readiness set to ready");
        }
    }

    /// Mark the node not ready.
    pub fn mark_not_ready(&self) {
        if self.ready.swap(false, Ordering::AcqRel) {
            debug!("Readiness set to not ready");
        }
    }

    /// Current value.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_not_ready() {
        assert!(!Readiness::new().is_ready());
    }

    #[test]
    fn test_clones_share_state() {
        let writer = Readiness::new();
        let reader = writer.clone();

        writer.mark_ready();
        assert!(reader.is_ready());

        writer.mark_not_ready();
        assert!(!reader.is_ready());
    }

    #[test]
    fn test_concurrent_readers() {
        let signal = Readiness::new();
        signal.mark_ready();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = signal.clone();
                std::thread::spawn(move || reader.is_ready())
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
