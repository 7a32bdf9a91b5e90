//! Common test utilities

use std::path::{Path, PathBuf};
use std::sync::Arc;

use siteward::convert::WorkerContext;
use siteward::models::ServiceDef;
use siteward::render::Renderer;
use siteward::store::ContentStore;

/// Write a page directory with its canonical file under `root`
pub fn write_page(root: &Path, rel_dir: &str, file: &str, content: &str) -> PathBuf {
    let dir = root.join(rel_dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), content).unwrap();
    dir
}

/// Worker context over a temp content root with an in-memory store and a
/// converter binary that does not exist (media conversion is not under test)
pub fn test_worker_context(root: &Path) -> Arc<WorkerContext> {
    Arc::new(WorkerContext {
        content_root: root.to_path_buf(),
        assets_root: root.join(".assets"),
        assets_output: root.join("out-assets"),
        ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
        store: Arc::new(ContentStore::in_memory().unwrap()),
        renderer: Arc::new(Renderer::new().unwrap()),
    })
}

/// A service definition that sleeps for the given seconds
pub fn sleeper_service(name: &str, seconds: &str, critical: bool) -> ServiceDef {
    ServiceDef {
        name: name.to_string(),
        command: "sleep".to_string(),
        args: vec![seconds.to_string()],
        workdir: PathBuf::from("."),
        env: vec![],
        critical,
        enabled: true,
    }
}

/// Front matter + markdown body for a simple page
#[allow(dead_code)]
pub fn page_source(title: &str, body: &str) -> String {
    format!("~~~\nCONTEXT:\n  title: {title}\n~~~\n{body}\n")
}
