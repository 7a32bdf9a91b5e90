//! Content store concurrency tests
//!
//! Exercises WAL-mode guarantees with a real on-disk database and
//! separate reader/writer handles, the way the converter and web
//! processes actually share the store.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use siteward::models::{AllowedMethods, ContentRecord};
use siteward::store::ContentStore;

fn record(key: &str, version: usize) -> ContentRecord {
    ContentRecord {
        content_key: key.to_string(),
        rendered_html: format!("<html><body>version {version}</body></html>"),
        title: format!("Title {version}"),
        allowed_methods: AllowedMethods::default(),
        source_hash: format!("hash-{version}"),
        updated_at: Utc::now(),
    }
}

#[test]
fn test_reader_never_sees_partial_record_across_handles() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("content.db");

    let writer = Arc::new(ContentStore::open(&db).unwrap());
    writer.upsert_page(&record("main:/page", 0)).unwrap();

    // Separate connection, as the web process would hold
    let reader = ContentStore::open(&db).unwrap();

    let writer_thread = {
        let writer = Arc::clone(&writer);
        std::thread::spawn(move || {
            for version in 1..=100 {
                writer.upsert_page(&record("main:/page", version)).unwrap();
            }
        })
    };

    for _ in 0..100 {
        let page = reader.get_page("main:/page").unwrap().unwrap();
        // html, title, and hash always belong to the same version
        let version: String = page
            .rendered_html
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        assert_eq!(page.title, format!("Title {version}"));
        assert_eq!(page.source_hash, format!("hash-{version}"));
    }

    writer_thread.join().unwrap();
}

#[test]
fn test_reads_do_not_block_writer() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("content.db");

    let writer = ContentStore::open(&db).unwrap();
    writer.upsert_page(&record("main:/a", 1)).unwrap();

    let reader = ContentStore::open(&db).unwrap();
    let _snapshot = reader.get_page("main:/a").unwrap();

    // With WAL the writer proceeds while a reader handle stays open
    for version in 2..=20 {
        writer.upsert_page(&record("main:/a", version)).unwrap();
    }
    assert_eq!(
        writer.get_page("main:/a").unwrap().unwrap().source_hash,
        "hash-20"
    );
}

#[test]
fn test_delete_visible_across_handles() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("content.db");

    let writer = ContentStore::open(&db).unwrap();
    writer.upsert_page(&record("main:/gone", 1)).unwrap();

    let reader = ContentStore::open(&db).unwrap();
    assert!(reader.get_page("main:/gone").unwrap().is_some());

    writer.delete_page("main:/gone").unwrap();
    assert!(reader.get_page("main:/gone").unwrap().is_none());
}

#[test]
fn test_store_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("content.db");

    {
        let store = ContentStore::open(&db).unwrap();
        store.upsert_page(&record("main:/persist", 7)).unwrap();
    }

    let store = ContentStore::open(&db).unwrap();
    let page = store.get_page("main:/persist").unwrap().unwrap();
    assert_eq!(page.source_hash, "hash-7");
    assert_eq!(store.count().unwrap(), 1);
}
