//! Event coalescing
//!
//! Editors and copy tools emit bursts of events for one logical change.
//! Events for the same path inside the coalescing window collapse into a
//! single entry carrying only the most recent event kind, so a delete
//! arriving after a modify unpublishes the page rather than racing it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Pending {
    deleted: bool,
    last_seen: Instant,
}

/// Per-path event coalescer with a fixed quiet window
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event, replacing any pending kind and restarting the
    /// path's quiet window.
    pub fn record(&mut self, path: &Path, deleted: bool) {
        self.record_at(path, deleted, Instant::now());
    }

    fn record_at(&mut self, path: &Path, deleted: bool, now: Instant) {
        self.pending.insert(
            path.to_path_buf(),
            Pending {
                deleted,
                last_seen: now,
            },
        );
    }

    /// Take every path whose quiet window has elapsed, as
    /// `(path, deleted)` pairs.
    pub fn drain_ready(&mut self) -> Vec<(PathBuf, bool)> {
        self.drain_ready_at(Instant::now())
    }

    fn drain_ready_at(&mut self, now: Instant) -> Vec<(PathBuf, bool)> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) >= self.window)
            .map(|(path, _)| path.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|p| (path, p.deleted))
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
