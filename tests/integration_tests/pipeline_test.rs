//! End-to-end conversion pipeline tests
//!
//! Tests the complete workflow:
//! 1. Content tree scan
//! 2. Filesystem watching and debounce
//! 3. Page conversion and storage
//! 4. Deletion handling

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use siteward::convert::{initial_scan, ConverterPool};
use siteward::watcher::FsWatcher;

use crate::common::{page_source, test_worker_context, write_page};

#[tokio::test]
async fn test_scan_builds_store_from_content_tree() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_page(root, "about", "about.md", &page_source("About", "# Hi"));
    write_page(root, "docs/guide", "guide.md", "# Guide\n");
    write_page(root, ".blog", "index.md", "# Blog\n");

    let ctx = test_worker_context(root);
    let report = initial_scan(&ctx).await.unwrap();
    assert_eq!(report.pages_stored, 3);
    assert_eq!(report.failures, 0);

    let about = ctx.store.get_page("main:/about").unwrap().unwrap();
    assert_eq!(about.title, "About");
    assert!(about.rendered_html.contains("<h1>Hi</h1>"));
    assert!(about.allowed_methods.contains("GET"));

    assert!(ctx.store.get_page("main:/docs/guide").unwrap().is_some());
    assert!(ctx.store.get_page("blog:/").unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn test_watch_convert_and_delete_cycle() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let ctx = test_worker_context(&root);

    let debounce = Duration::from_millis(200);
    let (task_tx, task_rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);

    let watcher = FsWatcher::new(&root, debounce);
    let watcher_handle = tokio::spawn(async move { watcher.run(task_tx, stop_rx).await });

    let pool_ctx = Arc::clone(&ctx);
    let pool_handle = tokio::spawn(async move {
        let pool = ConverterPool::new(pool_ctx, 2, Duration::from_secs(10));
        pool.run(task_rx).await;
    });

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Create: the record appears after the debounce window
    let dir = write_page(&root, "about", "about.md", &page_source("About", "# Hi"));
    wait_for(Duration::from_secs(5), || {
        ctx.store.get_page("main:/about").unwrap().is_some()
    })
    .await;

    // Modify: content is replaced in place
    std::fs::write(dir.join("about.md"), page_source("About", "# Changed")).unwrap();
    wait_for(Duration::from_secs(5), || {
        ctx.store
            .get_page("main:/about")
            .unwrap()
            .map(|r| r.rendered_html.contains("Changed"))
            .unwrap_or(false)
    })
    .await;

    // Delete: the record disappears within a debounce window or two
    std::fs::remove_file(dir.join("about.md")).unwrap();
    wait_for(Duration::from_secs(5), || {
        ctx.store.get_page("main:/about").unwrap().is_none()
    })
    .await;

    stop_tx.send(true).unwrap();
    watcher_handle.await.unwrap().unwrap();
    pool_handle.await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_subdomain_scope_via_watcher() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let ctx = test_worker_context(&root);

    let (task_tx, task_rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let watcher = FsWatcher::new(&root, Duration::from_millis(200));
    let watcher_handle = tokio::spawn(async move { watcher.run(task_tx, stop_rx).await });
    let pool_ctx = Arc::clone(&ctx);
    let pool_handle = tokio::spawn(async move {
        ConverterPool::new(pool_ctx, 2, Duration::from_secs(10))
            .run(task_rx)
            .await;
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    write_page(&root, ".blog", "index.md", "# Blog\n");
    wait_for(Duration::from_secs(5), || {
        ctx.store.get_page("blog:/").unwrap().is_some()
    })
    .await;

    stop_tx.send(true).unwrap();
    watcher_handle.await.unwrap().unwrap();
    pool_handle.await.unwrap();
}

#[tokio::test]
async fn test_rescan_after_offline_deletion() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dir = write_page(root, "about", "about.md", "# Hi\n");

    let ctx = test_worker_context(root);
    initial_scan(&ctx).await.unwrap();
    assert!(ctx.store.get_page("main:/about").unwrap().is_some());

    // Deleted while no watcher was running; the next scan catches it
    std::fs::remove_file(dir.join("about.md")).unwrap();
    std::fs::remove_dir(&dir).unwrap();
    initial_scan(&ctx).await.unwrap();
    assert!(ctx.store.get_page("main:/about").unwrap().is_none());
}

async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not met within {timeout:?}");
}
