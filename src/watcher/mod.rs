//! Filesystem watching
//!
//! Observes the content root recursively, classifies raw events into page
//! or media tasks, coalesces bursts through the [`Debouncer`], and pushes
//! ready tasks onto the conversion queue. The watcher only produces tasks;
//! it never touches the content store.

pub mod debounce;

pub use debounce::Debouncer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::convert::content_key;
use crate::models::{ConversionTask, TaskKind};

/// Errors raised while setting up or running the watcher
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Filesystem watch failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("Content root does not exist: {path}")]
    MissingRoot { path: PathBuf },

    #[error("Task queue closed")]
    QueueClosed,
}

/// Classify a changed path into a conversion task.
///
/// Files under the assets tree become media tasks keyed by the file.
/// Canonical page files (and directory events) become page tasks keyed by
/// the page directory, so edits to a page and its directory share one
/// dedup key. Everything else is ignored.
#[must_use]
pub fn classify(content_root: &Path, path: &Path, deleted: bool) -> Option<ConversionTask> {
    if !path.starts_with(content_root) {
        return None;
    }

    if is_ignored_name(path) {
        return None;
    }

    let assets_root = content_root.join(content_key::ASSETS_DIR);
    if path.starts_with(&assets_root) {
        if path.is_dir() {
            return None;
        }
        return Some(ConversionTask {
            source_path: path.to_path_buf(),
            kind: TaskKind::Media,
        });
    }

    // Directory events (and deletions of extensionless paths) re-evaluate
    // the directory itself as a page
    let is_dir_event = path.is_dir() || (deleted && path.extension().is_none());
    if is_dir_event {
        return Some(ConversionTask {
            source_path: path.to_path_buf(),
            kind: TaskKind::Page,
        });
    }

    if content_key::is_canonical_source(content_root, path) {
        let dir = content_key::dir_for_source(content_root, path)?;
        return Some(ConversionTask {
            source_path: dir,
            kind: TaskKind::Page,
        });
    }

    None
}

fn is_ignored_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    // Editor droppings and swap files
    name.ends_with('~') || name.ends_with(".swp") || name.starts_with(".#")
}

/// Recursive watcher feeding the conversion queue
pub struct FsWatcher {
    content_root: PathBuf,
    debounce_window: Duration,
}

impl FsWatcher {
    pub fn new(content_root: impl Into<PathBuf>, debounce_window: Duration) -> Self {
        Self {
            content_root: content_root.into(),
            debounce_window,
        }
    }

    /// Watch until the shutdown flag flips, forwarding debounced tasks.
    ///
    /// Raw events arrive on an unbounded bridge channel from the notify
    /// callback thread; a quarter-window tick drains the debouncer.
    pub async fn run(
        &self,
        task_tx: mpsc::Sender<ConversionTask>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WatchError> {
        if !self.content_root.is_dir() {
            return Err(WatchError::MissingRoot {
                path: self.content_root.clone(),
            });
        }

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Watch event error");
                }
            })?;
        watcher.watch(&self.content_root, RecursiveMode::Recursive)?;
        tracing::info!(root = %self.content_root.display(), "Watching content root");

        let mut debouncer = Debouncer::new(self.debounce_window);
        let tick = (self.debounce_window / 4).max(Duration::from_millis(100));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = raw_rx.recv() => {
                    let Some(event) = event else { break };
                    for path in &event.paths {
                        let deleted = !path.exists();
                        debouncer.record(path, deleted);
                    }
                }
                _ = interval.tick() => {
                    for (path, deleted) in debouncer.drain_ready() {
                        if let Some(task) = classify(&self.content_root, &path, deleted) {
                            tracing::debug!(path = %path.display(), deleted, "Task ready");
                            task_tx
                                .send(task)
                                .await
                                .map_err(|_| WatchError::QueueClosed)?;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Flush whatever is still pending so a save right before shutdown
        // is not lost
        tokio::time::sleep(self.debounce_window).await;
        for (path, deleted) in debouncer.drain_ready() {
            if let Some(task) = classify(&self.content_root, &path, deleted) {
                if task_tx.send(task).await.is_err() {
                    break;
                }
            }
        }

        tracing::info!("Watcher stopped");
        Ok(())
    }
}
