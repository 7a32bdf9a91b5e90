//! Conversion pipeline
//!
//! Tasks produced by the filesystem watcher are executed by a bounded
//! worker pool. The dispatcher enforces at-most-one-in-flight per dedup
//! key: a task arriving for a key already being processed is parked and
//! dispatched when the in-flight one completes, with only the newest
//! parked task surviving. Distinct keys run fully concurrently.

pub mod content_key;
pub mod front_matter;
pub mod media;
pub mod page;

pub use content_key::ContentKey;
pub use media::{MediaKind, MediaOutcome};
pub use page::PageOutcome;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

use crate::config::Config;
use crate::models::{ConversionTask, TaskKind};
use crate::render::Renderer;
use crate::store::ContentStore;

/// Errors raised by conversion tasks. All of them are task-local: the
/// pipeline logs them and moves on, leaving prior output untouched.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("No canonical content file in {dir}")]
    MissingCanonicalFile { dir: PathBuf },

    #[error("Path is outside the content root: {path}")]
    OutsideContentRoot { path: PathBuf },

    #[error("Malformed front matter: {detail}")]
    FrontMatter { detail: String },

    #[error("Media converter failed for {path}: {detail}")]
    MediaConverterFailed { path: String, detail: String },

    #[error(transparent)]
    Render(#[from] crate::render::RenderError),

    #[error("Content store error: {detail}")]
    Store { detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Whether a retry without editing the source could succeed.
    /// Malformed input needs a human; converter and store failures are
    /// retried on the next filesystem event for the path.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::MediaConverterFailed { .. } | Self::Store { .. } | Self::Io(_) => true,
            Self::MissingCanonicalFile { .. }
            | Self::OutsideContentRoot { .. }
            | Self::FrontMatter { .. }
            | Self::Render(_) => false,
        }
    }
}

/// Everything a worker needs, shared across the pool
pub struct WorkerContext {
    pub content_root: PathBuf,
    pub assets_root: PathBuf,
    pub assets_output: PathBuf,
    pub ffmpeg: PathBuf,
    pub store: Arc<ContentStore>,
    pub renderer: Arc<Renderer>,
}

impl WorkerContext {
    pub fn from_config(config: &Config, store: Arc<ContentStore>) -> crate::error::Result<Self> {
        Ok(Self {
            content_root: config.paths.content_root.clone(),
            assets_root: config.paths.assets_source(),
            assets_output: config.paths.assets_output(),
            ffmpeg: config.converter.ffmpeg_path.clone(),
            store,
            renderer: Arc::new(Renderer::from_directory(&config.paths.templates_dir)?),
        })
    }
}

/// Bounded worker pool with per-key in-flight exclusion
pub struct ConverterPool {
    ctx: Arc<WorkerContext>,
    workers: usize,
    drain_timeout: Duration,
}

impl ConverterPool {
    pub fn new(ctx: Arc<WorkerContext>, workers: usize, drain_timeout: Duration) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
            drain_timeout,
        }
    }

    /// Run the dispatcher until the task channel closes, then drain
    /// in-flight work within the drain timeout.
    pub async fn run(&self, mut tasks: mpsc::Receiver<ConversionTask>) {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (done_tx, mut done_rx) = mpsc::channel::<String>(self.workers.max(16));

        // key -> newest parked task waiting for the in-flight one
        let mut in_flight: HashMap<String, Option<ConversionTask>> = HashMap::new();

        loop {
            tokio::select! {
                task = tasks.recv() => {
                    match task {
                        Some(task) => {
                            let key = task.dedup_key();
                            match in_flight.get_mut(&key) {
                                Some(parked) => {
                                    // Newest event wins while a worker is busy on this key
                                    *parked = Some(task);
                                }
                                None => {
                                    in_flight.insert(key, None);
                                    self.dispatch(task, &semaphore, &done_tx);
                                }
                            }
                        }
                        None => break,
                    }
                }
                Some(key) = done_rx.recv() => {
                    self.on_complete(&key, &mut in_flight, &semaphore, &done_tx);
                }
            }
        }

        // Channel closed: stop accepting, drain what is already in flight
        let drain = tokio::time::timeout(self.drain_timeout, async {
            while !in_flight.is_empty() {
                match done_rx.recv().await {
                    Some(key) => self.on_complete(&key, &mut in_flight, &semaphore, &done_tx),
                    None => break,
                }
            }
        })
        .await;

        if drain.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "Drain timeout elapsed with tasks still in flight"
            );
        }
    }

    fn on_complete(
        &self,
        key: &str,
        in_flight: &mut HashMap<String, Option<ConversionTask>>,
        semaphore: &Arc<Semaphore>,
        done_tx: &mpsc::Sender<String>,
    ) {
        match in_flight.get_mut(key) {
            Some(parked) => {
                if let Some(next) = parked.take() {
                    self.dispatch(next, semaphore, done_tx);
                } else {
                    in_flight.remove(key);
                }
            }
            None => {
                tracing::debug!(key, "Completion for unknown key");
            }
        }
    }

    fn dispatch(
        &self,
        task: ConversionTask,
        semaphore: &Arc<Semaphore>,
        done_tx: &mpsc::Sender<String>,
    ) {
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(semaphore);
        let done_tx = done_tx.clone();

        tokio::spawn(async move {
            let key = task.dedup_key();
            // Closed semaphore never happens; holder is alive for the pool's lifetime
            if let Ok(_permit) = semaphore.acquire().await {
                match run_task(&ctx, &task).await {
                    Ok(()) => {}
                    // New directories arrive before their content file does
                    Err(ConvertError::MissingCanonicalFile { dir }) => {
                        tracing::debug!(dir = %dir.display(), "No content file yet");
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, recoverable = e.is_recoverable(), "Conversion task failed");
                    }
                }
            }
            let _ = done_tx.send(key).await;
        });
    }
}

/// Execute one task to completion
pub async fn run_task(ctx: &Arc<WorkerContext>, task: &ConversionTask) -> Result<(), ConvertError> {
    match task.kind {
        TaskKind::Page => {
            let ctx = Arc::clone(ctx);
            let dir = task.source_path.clone();
            tokio::task::spawn_blocking(move || {
                page::process_page(&ctx.content_root, &dir, &ctx.store, &ctx.renderer)
            })
            .await
            .map_err(|e| ConvertError::Store {
                detail: format!("worker panicked: {e}"),
            })??;
        }
        TaskKind::Media => {
            media::process_media(
                &ctx.assets_root,
                &ctx.assets_output,
                &task.source_path,
                &ctx.ffmpeg,
            )
            .await?;
        }
    }
    Ok(())
}

/// Summary of an [`initial_scan`] pass
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub pages_stored: usize,
    pub pages_unchanged: usize,
    pub pages_removed: usize,
    pub assets_converted: usize,
    pub assets_copied: usize,
    pub assets_up_to_date: usize,
    pub orphans_removed: usize,
    pub failures: usize,
}

/// Full synchronous pass over the content tree.
///
/// Runs before the web server may start serving: every page directory is
/// converted (unchanged hashes skip the write), stale store entries and
/// orphaned derived assets are cleared. Individual failures are logged
/// and counted, never fatal to the scan.
pub async fn initial_scan(ctx: &Arc<WorkerContext>) -> Result<ScanReport, ConvertError> {
    let mut report = ScanReport::default();

    let dirs = content_key::discover_page_dirs(&ctx.content_root)?;
    let mut live_keys = std::collections::HashSet::new();

    for dir in &dirs {
        let Some(key) = content_key::key_for_dir(&ctx.content_root, dir) else {
            continue;
        };

        let ctx_clone = Arc::clone(ctx);
        let dir_clone = dir.clone();
        let result = tokio::task::spawn_blocking(move || {
            page::process_page(
                &ctx_clone.content_root,
                &dir_clone,
                &ctx_clone.store,
                &ctx_clone.renderer,
            )
        })
        .await
        .map_err(|e| ConvertError::Store {
            detail: format!("worker panicked: {e}"),
        })?;

        match result {
            Ok(PageOutcome::Stored) => {
                live_keys.insert(key.storage_key());
                report.pages_stored += 1;
            }
            Ok(PageOutcome::Unchanged) => {
                live_keys.insert(key.storage_key());
                report.pages_unchanged += 1;
            }
            Ok(PageOutcome::Removed) => report.pages_removed += 1,
            Err(ConvertError::MissingCanonicalFile { dir }) => {
                tracing::debug!(dir = %dir.display(), "Directory has no content file, skipping");
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Page scan failed");
                report.failures += 1;
            }
        }
    }

    // Stale store rows for directories that vanished while we were down
    for key in ctx.store.all_keys().map_err(store_err)? {
        if !live_keys.contains(&key) {
            ctx.store.delete_page(&key).map_err(store_err)?;
            report.pages_removed += 1;
            tracing::info!(key = %key, "Stale page removed");
        }
    }

    for source in media::walk_files(&ctx.assets_root)? {
        match media::process_media(&ctx.assets_root, &ctx.assets_output, &source, &ctx.ffmpeg)
            .await
        {
            Ok(MediaOutcome::Converted) => report.assets_converted += 1,
            Ok(MediaOutcome::Copied) => report.assets_copied += 1,
            Ok(MediaOutcome::UpToDate) => report.assets_up_to_date += 1,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "Asset scan failed");
                report.failures += 1;
            }
        }
    }

    report.orphans_removed = media::cleanup_orphans(&ctx.assets_root, &ctx.assets_output)?;

    tracing::info!(
        stored = report.pages_stored,
        unchanged = report.pages_unchanged,
        removed = report.pages_removed,
        converted = report.assets_converted,
        failures = report.failures,
        "Initial scan complete"
    );
    Ok(report)
}

fn store_err(e: crate::error::Error) -> ConvertError {
    ConvertError::Store {
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_ctx(root: &Path) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            content_root: root.to_path_buf(),
            assets_root: root.join(".assets"),
            assets_output: root.join("out"),
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            store: Arc::new(ContentStore::in_memory().unwrap()),
            renderer: Arc::new(Renderer::new().unwrap()),
        })
    }

    fn page_task(dir: &Path) -> ConversionTask {
        ConversionTask {
            source_path: dir.to_path_buf(),
            kind: TaskKind::Page,
        }
    }

    #[tokio::test]
    async fn test_pool_processes_tasks_and_drains() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        for name in ["a", "b", "c"] {
            let dir = root.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{name}.md")), format!("# Page {name}\n")).unwrap();
        }

        let ctx = test_ctx(root);
        let pool = ConverterPool::new(Arc::clone(&ctx), 2, Duration::from_secs(5));
        let (tx, rx) = mpsc::channel(16);

        for name in ["a", "b", "c"] {
            tx.send(page_task(&root.join(name))).await.unwrap();
        }
        drop(tx);
        pool.run(rx).await;

        assert_eq!(ctx.store.count().unwrap(), 3);
        assert!(ctx.store.get_page("main:/b").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pool_latest_event_wins_for_same_key() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let dir = root.join("page");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("page.md"), "# v1\n").unwrap();

        let ctx = test_ctx(root);
        let pool = ConverterPool::new(Arc::clone(&ctx), 1, Duration::from_secs(5));
        let (tx, rx) = mpsc::channel(16);

        // Burst of events for one key; final file state must win
        for _ in 0..5 {
            tx.send(page_task(&dir)).await.unwrap();
        }
        std::fs::write(dir.join("page.md"), "# final\n").unwrap();
        tx.send(page_task(&dir)).await.unwrap();
        drop(tx);
        pool.run(rx).await;

        let record = ctx.store.get_page("main:/page").unwrap().unwrap();
        assert!(record.rendered_html.contains("final"));
    }

    #[tokio::test]
    async fn test_initial_scan_builds_store_and_clears_stale_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let about = root.join("about");
        std::fs::create_dir_all(&about).unwrap();
        std::fs::write(about.join("about.md"), "# About\n").unwrap();
        let blog = root.join(".blog");
        std::fs::create_dir_all(&blog).unwrap();
        std::fs::write(blog.join("index.md"), "# Blog\n").unwrap();

        let ctx = test_ctx(root);
        // Pretend a page existed for a directory that is now gone
        ctx.store
            .upsert_page(&crate::models::ContentRecord {
                content_key: "main:/gone".to_string(),
                rendered_html: "<p>old</p>".to_string(),
                title: "Gone".to_string(),
                allowed_methods: Default::default(),
                source_hash: "x".to_string(),
                updated_at: chrono::Utc::now(),
            })
            .unwrap();

        let report = initial_scan(&ctx).await.unwrap();
        assert_eq!(report.pages_stored, 2);
        assert_eq!(report.pages_removed, 1);
        assert!(ctx.store.get_page("main:/about").unwrap().is_some());
        assert!(ctx.store.get_page("blog:/").unwrap().is_some());
        assert!(ctx.store.get_page("main:/gone").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initial_scan_copies_static_assets() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let docs = root.join(".assets").join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("manual.pdf"), b"pdf bytes").unwrap();

        let ctx = test_ctx(root);
        let report = initial_scan(&ctx).await.unwrap();
        assert_eq!(report.assets_copied, 1);
        assert_eq!(report.failures, 0);
        assert!(ctx.assets_output.join("docs").join("manual.pdf").exists());
    }

    #[tokio::test]
    async fn test_initial_scan_rerun_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let dir = root.join("about");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("about.md"), "# About\n").unwrap();

        let ctx = test_ctx(root);
        let first = initial_scan(&ctx).await.unwrap();
        assert_eq!(first.pages_stored, 1);

        let second = initial_scan(&ctx).await.unwrap();
        assert_eq!(second.pages_stored, 0);
        assert_eq!(second.pages_unchanged, 1);
    }
}
