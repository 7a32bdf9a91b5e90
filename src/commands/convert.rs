//! `convert` (hidden): the content-converter process
//!
//! Runs the filesystem watcher and conversion worker pool against the
//! content store. Performs a full scan on startup and again on a long
//! interval to catch anything the watcher missed, then processes
//! debounced events until told to stop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::convert::{initial_scan, ConverterPool, WorkerContext};
use crate::store::ContentStore;
use crate::watcher::FsWatcher;

pub async fn run(config: Config) -> Result<()> {
    let store = Arc::new(ContentStore::open(config.paths.content_db())?);
    let ctx = Arc::new(WorkerContext::from_config(&config, store)?);

    initial_scan(&ctx).await.context("Initial scan failed")?;

    let (task_tx, task_rx) = mpsc::channel(256);
    let (stop_tx, stop_rx) = watch::channel(false);

    let watcher = FsWatcher::new(&config.paths.content_root, config.debounce_window());
    let watcher_handle = tokio::spawn(async move { watcher.run(task_tx, stop_rx).await });

    let pool = ConverterPool::new(
        Arc::clone(&ctx),
        config.worker_count(),
        config.drain_timeout(),
    );
    let pool_handle = tokio::spawn(async move { pool.run(task_rx).await });

    let mut rescan = tokio::time::interval(std::time::Duration::from_secs(
        config.converter.scan_interval_secs.max(60),
    ));
    rescan.tick().await; // first tick fires immediately; the startup scan covered it

    #[cfg(unix)]
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        #[cfg(unix)]
        let stop = tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            _ = term.recv() => true,
            _ = rescan.tick() => {
                if let Err(e) = initial_scan(&ctx).await {
                    tracing::warn!(error = %e, "Periodic rescan failed");
                }
                false
            }
        };

        #[cfg(not(unix))]
        let stop = tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            _ = rescan.tick() => {
                if let Err(e) = initial_scan(&ctx).await {
                    tracing::warn!(error = %e, "Periodic rescan failed");
                }
                false
            }
        };

        if stop {
            break;
        }
    }

    tracing::info!("Converter stopping");
    // Watcher flushes its debounce buffer and drops the task sender,
    // which lets the pool drain and exit
    let _ = stop_tx.send(true);
    match watcher_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Watcher exited with error"),
        Err(e) => tracing::warn!(error = %e, "Watcher task panicked"),
    }
    if let Err(e) = pool_handle.await {
        tracing::warn!(error = %e, "Pool task panicked");
    }
    Ok(())
}
