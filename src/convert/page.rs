//! Page conversion
//!
//! Turns one page directory into a stored [`ContentRecord`]: resolve the
//! canonical source file, split front matter, render the body through the
//! selected template, and upsert in one atomic write. An unchanged source
//! hash short-circuits before any render or store write.

use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::models::{AllowedMethods, ContentRecord};
use crate::render::{self, PageContext, Renderer};
use crate::store::ContentStore;

use super::{content_key, ConvertError};

/// What a page task did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Record written (new or replaced)
    Stored,

    /// Source hash matched the stored record, nothing written
    Unchanged,

    /// Source gone, record removed
    Removed,
}

/// Process one page directory end to end
pub fn process_page(
    content_root: &Path,
    dir: &Path,
    store: &ContentStore,
    renderer: &Renderer,
) -> Result<PageOutcome, ConvertError> {
    let Some(key) = content_key::key_for_dir(content_root, dir) else {
        return Err(ConvertError::OutsideContentRoot {
            path: dir.to_path_buf(),
        });
    };
    let storage_key = key.storage_key();

    // Deleted directory or deleted canonical file both unpublish the page
    if !dir.is_dir() {
        return remove_page(store, &storage_key);
    }
    let source = match content_key::canonical_file(content_root, dir) {
        Ok(path) => path,
        Err(ConvertError::MissingCanonicalFile { dir }) => {
            // a page whose content file was deleted gets unpublished
            if store.get_page(&storage_key).map_err(store_err)?.is_some() {
                return remove_page(store, &storage_key);
            }
            return Err(ConvertError::MissingCanonicalFile { dir });
        }
        Err(e) => return Err(e),
    };

    let raw = std::fs::read_to_string(&source)?;
    let source_hash = hash_source(&raw);

    if store.get_source_hash(&storage_key).map_err(store_err)?.as_deref()
        == Some(source_hash.as_str())
    {
        tracing::debug!(key = %storage_key, "Source unchanged, skipping");
        return Ok(PageOutcome::Unchanged);
    }

    let (front, body) = super::front_matter::parse(&raw)?;

    let is_markdown = source
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"));

    let body_html = if is_markdown {
        render::markdown_to_html(body)
    } else {
        body.to_string()
    };

    let title = front
        .title()
        .or_else(|| {
            if is_markdown {
                render::title_from_markdown(body)
            } else {
                render::title_from_html(body)
            }
        })
        .unwrap_or_else(|| default_title(&key));

    let template_spec = front.template.clone().unwrap_or_default();
    let page = PageContext {
        title: title.clone(),
        body: body_html,
        css: template_spec.css,
        js: template_spec.js,
        head_html: template_spec.html,
        context: front.context_json(),
    };

    let rendered_html = renderer.render(front.template_name(), &page)?;

    let allowed_methods = front
        .allowed_methods
        .as_deref()
        .map(AllowedMethods::from_list)
        .unwrap_or_default();

    let record = ContentRecord {
        content_key: storage_key.clone(),
        rendered_html,
        title,
        allowed_methods,
        source_hash,
        updated_at: Utc::now(),
    };
    store.upsert_page(&record).map_err(store_err)?;

    tracing::info!(key = %storage_key, source = %source.display(), "Page converted");
    Ok(PageOutcome::Stored)
}

fn remove_page(store: &ContentStore, storage_key: &str) -> Result<PageOutcome, ConvertError> {
    let existed = store.delete_page(storage_key).map_err(store_err)?;
    if existed {
        tracing::info!(key = %storage_key, "Page removed");
    }
    Ok(PageOutcome::Removed)
}

fn hash_source(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn default_title(key: &super::content_key::ContentKey) -> String {
    key.segments
        .last()
        .cloned()
        .unwrap_or_else(|| key.scope.clone())
}

fn store_err(e: crate::error::Error) -> ConvertError {
    ConvertError::Store {
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ContentStore, Renderer) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ContentStore::in_memory().unwrap();
        let renderer = Renderer::new().unwrap();
        (tmp, store, renderer)
    }

    fn write_page(root: &Path, rel_dir: &str, file: &str, content: &str) -> std::path::PathBuf {
        let dir = root.join(rel_dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
        dir
    }

    #[test]
    fn test_markdown_page_stored_under_main_scope() {
        let (tmp, store, renderer) = setup();
        let dir = write_page(
            tmp.path(),
            "about",
            "about.md",
            "~~~\nCONTEXT:\n  title: About\n~~~\n# Hi\n",
        );

        let outcome = process_page(tmp.path(), &dir, &store, &renderer).unwrap();
        assert_eq!(outcome, PageOutcome::Stored);

        let record = store.get_page("main:/about").unwrap().unwrap();
        assert_eq!(record.title, "About");
        assert!(record.rendered_html.contains("<h1>Hi</h1>"));
        assert!(record.rendered_html.contains("<title>About</title>"));
        assert_eq!(record.allowed_methods, AllowedMethods::default());
    }

    #[test]
    fn test_scope_root_index_page() {
        let (tmp, store, renderer) = setup();
        let dir = write_page(tmp.path(), ".blog", "index.md", "# Blog\n");

        process_page(tmp.path(), &dir, &store, &renderer).unwrap();
        let record = store.get_page("blog:/").unwrap().unwrap();
        assert_eq!(record.title, "Blog");
    }

    #[test]
    fn test_unchanged_hash_skips_write() {
        let (tmp, store, renderer) = setup();
        let dir = write_page(tmp.path(), "about", "about.md", "# Same\n");

        assert_eq!(
            process_page(tmp.path(), &dir, &store, &renderer).unwrap(),
            PageOutcome::Stored
        );
        let first = store.get_page("main:/about").unwrap().unwrap();

        assert_eq!(
            process_page(tmp.path(), &dir, &store, &renderer).unwrap(),
            PageOutcome::Unchanged
        );
        let second = store.get_page("main:/about").unwrap().unwrap();
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[test]
    fn test_deleted_source_removes_record() {
        let (tmp, store, renderer) = setup();
        let dir = write_page(tmp.path(), "about", "about.md", "# Hi\n");
        process_page(tmp.path(), &dir, &store, &renderer).unwrap();
        assert!(store.get_page("main:/about").unwrap().is_some());

        std::fs::remove_file(dir.join("about.md")).unwrap();
        let outcome = process_page(tmp.path(), &dir, &store, &renderer).unwrap();
        assert_eq!(outcome, PageOutcome::Removed);
        assert!(store.get_page("main:/about").unwrap().is_none());
    }

    #[test]
    fn test_html_source_passes_body_through() {
        let (tmp, store, renderer) = setup();
        let dir = write_page(
            tmp.path(),
            "landing",
            "landing.html",
            "<title>Landing</title><p>raw *stars* kept</p>",
        );

        process_page(tmp.path(), &dir, &store, &renderer).unwrap();
        let record = store.get_page("main:/landing").unwrap().unwrap();
        assert_eq!(record.title, "Landing");
        assert!(record.rendered_html.contains("raw *stars* kept"));
    }

    #[test]
    fn test_allowed_methods_from_front_matter() {
        let (tmp, store, renderer) = setup();
        let dir = write_page(
            tmp.path(),
            "form",
            "form.md",
            "~~~\nALLOWED_METHODS:\n  - GET\n  - POST\n~~~\nbody",
        );

        process_page(tmp.path(), &dir, &store, &renderer).unwrap();
        let record = store.get_page("main:/form").unwrap().unwrap();
        assert!(record.allowed_methods.contains("POST"));
    }

    #[test]
    fn test_front_matter_selects_directory_template() {
        let (tmp, store, _) = setup();
        let templates = tmp.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("minimal.hbs"),
            "<article data-t=\"minimal\">{{{body}}}</article>",
        )
        .unwrap();
        let renderer = Renderer::from_directory(&templates).unwrap();

        let dir = write_page(
            tmp.path(),
            "about",
            "about.md",
            "~~~\nTEMPLATE:\n  NAME: minimal\n~~~\n# Hi\n",
        );
        process_page(tmp.path(), &dir, &store, &renderer).unwrap();

        let record = store.get_page("main:/about").unwrap().unwrap();
        assert!(record.rendered_html.contains("data-t=\"minimal\""));
        assert!(record.rendered_html.contains("<h1>Hi</h1>"));
        // Not wrapped by the built-in default
        assert!(!record.rendered_html.contains("<!DOCTYPE html>"));
    }

    #[test]
    fn test_unknown_template_fails_and_keeps_prior_record() {
        let (tmp, store, renderer) = setup();
        let dir = write_page(tmp.path(), "page", "page.md", "# v1\n");
        process_page(tmp.path(), &dir, &store, &renderer).unwrap();

        std::fs::write(
            dir.join("page.md"),
            "~~~\nTEMPLATE:\n  NAME: no-such-template\n~~~\n# v2\n",
        )
        .unwrap();

        let err = process_page(tmp.path(), &dir, &store, &renderer).unwrap_err();
        assert!(matches!(err, ConvertError::Render(_)));

        // Prior record untouched on failure
        let record = store.get_page("main:/page").unwrap().unwrap();
        assert!(record.rendered_html.contains("v1"));
    }
}
