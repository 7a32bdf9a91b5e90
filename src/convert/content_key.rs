//! Content key derivation
//!
//! A content key is `<scope>:/<path>`, derived purely from a directory's
//! position under the content root. Dot-prefixed top-level directories name
//! a separate host scope (subdomain); everything else lives under `main`.
//! The canonical source file inside a directory shares the directory's
//! name (`about/about.md`), with `index.md`/`index.html` at scope roots.

use std::path::{Component, Path, PathBuf};

use super::ConvertError;

/// Top-level directory holding raw media sources, never served as pages
pub const ASSETS_DIR: &str = ".assets";

const PAGE_EXTENSIONS: [&str; 2] = ["html", "md"];

/// A parsed content key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    /// Host scope: `main` or a subdomain name
    pub scope: String,

    /// URL path segments under the scope root
    pub segments: Vec<String>,
}

impl ContentKey {
    /// Storage form: `main:/about/team`, `blog:/` for a scope root
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:/{}", self.scope, self.segments.join("/"))
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// Derive the content key for a page directory.
///
/// Returns `None` for directories outside the content root, for the
/// assets tree, and for the content root itself when it is ambiguous.
#[must_use]
pub fn key_for_dir(content_root: &Path, dir: &Path) -> Option<ContentKey> {
    let rel = dir.strip_prefix(content_root).ok()?;

    let mut parts: Vec<String> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }

    let (scope, segments) = match parts.split_first() {
        None => ("main".to_string(), Vec::new()),
        Some((first, rest)) if first.starts_with('.') => {
            if first == ASSETS_DIR {
                return None;
            }
            (first.trim_start_matches('.').to_string(), rest.to_vec())
        }
        Some(_) => ("main".to_string(), parts),
    };

    if scope.is_empty() {
        return None;
    }

    Some(ContentKey { scope, segments })
}

/// The page directory a source file belongs to: its parent directory.
#[must_use]
pub fn dir_for_source(content_root: &Path, source: &Path) -> Option<PathBuf> {
    let parent = source.parent()?;
    if parent.starts_with(content_root) {
        Some(parent.to_path_buf())
    } else {
        None
    }
}

/// Resolve the canonical source file for a page directory.
///
/// The file must share the directory's name (`about/about.md`); at a scope
/// root the name is `index`. When both `.html` and `.md` exist, `.html`
/// wins. Missing canonical file is an error the caller reports once.
pub fn canonical_file(content_root: &Path, dir: &Path) -> Result<PathBuf, ConvertError> {
    let stem = canonical_stem(content_root, dir);

    for ext in PAGE_EXTENSIONS {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(ConvertError::MissingCanonicalFile {
        dir: dir.to_path_buf(),
    })
}

/// Whether `source` is the canonical page file of its directory
#[must_use]
pub fn is_canonical_source(content_root: &Path, source: &Path) -> bool {
    let Some(dir) = source.parent() else {
        return false;
    };
    let Some(ext) = source.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return false;
    }
    let Some(stem) = source.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    stem == canonical_stem(content_root, dir)
}

/// Expected file stem for a directory's canonical page file
fn canonical_stem(content_root: &Path, dir: &Path) -> String {
    let key = key_for_dir(content_root, dir);
    let is_scope_root = key.as_ref().is_some_and(|k| k.segments.is_empty());

    if is_scope_root {
        "index".to_string()
    } else {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string())
    }
}

/// Walk the content tree collecting every page directory.
///
/// Scope roots count; the assets tree and nested dot-directories are
/// skipped entirely.
pub fn discover_page_dirs(content_root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    if !content_root.is_dir() {
        return Ok(dirs);
    }

    let mut stack = vec![(content_root.to_path_buf(), true)];
    while let Some((dir, is_root)) = stack.pop() {
        dirs.push(dir.clone());

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                // Dot-directories are scopes only at the top level
                if is_root && name != ASSETS_DIR {
                    stack.push((path, false));
                }
                continue;
            }
            stack.push((path, false));
        }
    }

    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_for_nested_main_dir() {
        let root = Path::new("/srv/content");
        let key = key_for_dir(root, Path::new("/srv/content/about")).unwrap();
        assert_eq!(key.storage_key(), "main:/about");

        let deep = key_for_dir(root, Path::new("/srv/content/docs/guide")).unwrap();
        assert_eq!(deep.storage_key(), "main:/docs/guide");
    }

    #[test]
    fn test_key_for_scope_roots() {
        let root = Path::new("/srv/content");
        let main = key_for_dir(root, root).unwrap();
        assert_eq!(main.storage_key(), "main:/");

        let blog = key_for_dir(root, Path::new("/srv/content/.blog")).unwrap();
        assert_eq!(blog.storage_key(), "blog:/");

        let post = key_for_dir(root, Path::new("/srv/content/.blog/first-post")).unwrap();
        assert_eq!(post.storage_key(), "blog:/first-post");
    }

    #[test]
    fn test_assets_tree_has_no_key() {
        let root = Path::new("/srv/content");
        assert!(key_for_dir(root, Path::new("/srv/content/.assets")).is_none());
    }

    #[test]
    fn test_key_outside_root_is_none() {
        let root = Path::new("/srv/content");
        assert!(key_for_dir(root, Path::new("/elsewhere/about")).is_none());
    }

    #[test]
    fn test_canonical_file_prefers_html() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let dir = root.join("about");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("about.md"), "# md").unwrap();

        assert_eq!(canonical_file(root, &dir).unwrap(), dir.join("about.md"));

        std::fs::write(dir.join("about.html"), "<p>html</p>").unwrap();
        assert_eq!(canonical_file(root, &dir).unwrap(), dir.join("about.html"));
    }

    #[test]
    fn test_canonical_file_index_at_scope_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        let blog = root.join(".blog");
        std::fs::create_dir_all(&blog).unwrap();
        std::fs::write(blog.join("index.md"), "# blog").unwrap();

        assert_eq!(canonical_file(root, &blog).unwrap(), blog.join("index.md"));
    }

    #[test]
    fn test_canonical_file_missing_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("empty");
        std::fs::create_dir_all(&dir).unwrap();

        let err = canonical_file(tmp.path(), &dir).unwrap_err();
        assert!(matches!(err, ConvertError::MissingCanonicalFile { .. }));
    }

    #[test]
    fn test_is_canonical_source() {
        let root = Path::new("/srv/content");
        assert!(is_canonical_source(
            root,
            Path::new("/srv/content/about/about.md")
        ));
        assert!(is_canonical_source(
            root,
            Path::new("/srv/content/.blog/index.html")
        ));
        assert!(!is_canonical_source(
            root,
            Path::new("/srv/content/about/notes.md")
        ));
        assert!(!is_canonical_source(
            root,
            Path::new("/srv/content/about/about.txt")
        ));
    }

    #[test]
    fn test_discover_page_dirs_skips_assets() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("about")).unwrap();
        std::fs::create_dir_all(root.join(".blog/post")).unwrap();
        std::fs::create_dir_all(root.join(".assets/images")).unwrap();

        let dirs = discover_page_dirs(root).unwrap();
        assert!(dirs.contains(&root.to_path_buf()));
        assert!(dirs.contains(&root.join("about")));
        assert!(dirs.contains(&root.join(".blog")));
        assert!(dirs.contains(&root.join(".blog/post")));
        assert!(!dirs.iter().any(|d| d.starts_with(root.join(".assets"))));
    }
}
