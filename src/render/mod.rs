//! HTML document rendering
//!
//! Converted page bodies are wrapped into complete HTML documents through
//! a Handlebars template registry. Front matter selects the template by
//! name and may supply inline CSS/JS and extra context values; naming a
//! template that was never registered is an error, not a silent fallback.

use std::collections::BTreeMap;
use std::path::Path;

use handlebars::Handlebars;
use pulldown_cmark::{html, Options, Parser};
use serde::Serialize;
use thiserror::Error;

/// Name of the built-in template used when front matter does not pick one
pub const DEFAULT_TEMPLATE: &str = "default";

const DEFAULT_TEMPLATE_SOURCE: &str = include_str!("../../templates/page.hbs");

/// Errors raised while producing HTML documents
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unknown template: {name}")]
    TemplateNotFound { name: String },

    #[error("Template registration failed: {0}")]
    TemplateInvalid(#[from] Box<handlebars::TemplateError>),

    #[error("Template rendering failed: {0}")]
    RenderFailed(#[from] handlebars::RenderError),

    #[error("Template load failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Values handed to a page template
#[derive(Debug, Clone, Serialize, Default)]
pub struct PageContext {
    /// Document title
    pub title: String,

    /// Already-rendered body HTML (inserted unescaped)
    pub body: String,

    /// Inline stylesheet from front matter, if any
    pub css: Option<String>,

    /// Inline script from front matter, if any
    pub js: Option<String>,

    /// Raw HTML head snippet from front matter, if any
    pub head_html: Option<String>,

    /// Free-form front matter context, addressable as `{{context.key}}`
    pub context: BTreeMap<String, serde_json::Value>,
}

/// Handlebars-backed template registry
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    /// Create a renderer with the built-in default template registered
    pub fn new() -> Result<Self, RenderError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry
            .register_template_string(DEFAULT_TEMPLATE, DEFAULT_TEMPLATE_SOURCE)
            .map_err(Box::new)?;
        Ok(Self { registry })
    }

    /// Create a renderer with the built-in default plus every `*.hbs`
    /// file found under `dir`, each registered by its file stem. A
    /// missing directory means no extra templates, not an error.
    pub fn from_directory(dir: &Path) -> Result<Self, RenderError> {
        let mut renderer = Self::new()?;
        renderer.load_directory(dir)?;
        Ok(renderer)
    }

    /// Register every `*.hbs` file under `dir` by file stem
    pub fn load_directory(&mut self, dir: &Path) -> Result<(), RenderError> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("hbs") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)?;
            self.registry
                .register_template_string(name, source)
                .map_err(Box::new)?;
            tracing::debug!(name, path = %path.display(), "Template registered");
        }
        Ok(())
    }

    /// Register an additional named template
    pub fn register(&mut self, name: &str, source: &str) -> Result<(), RenderError> {
        self.registry
            .register_template_string(name, source)
            .map_err(Box::new)?;
        Ok(())
    }

    /// Whether a template with this name is registered
    #[must_use]
    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }

    /// Render a complete HTML document
    pub fn render(&self, template: &str, page: &PageContext) -> Result<String, RenderError> {
        if !self.registry.has_template(template) {
            return Err(RenderError::TemplateNotFound {
                name: template.to_string(),
            });
        }
        Ok(self.registry.render(template, page)?)
    }
}

/// Convert Markdown source to an HTML fragment
#[must_use]
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut output = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut output, parser);
    output
}

/// Extract a title from a Markdown body: the first ATX heading, if any
#[must_use]
pub fn title_from_markdown(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|title| !title.is_empty())
}

/// Extract a title from an HTML body: the `<title>` element, if any
#[must_use]
pub fn title_from_html(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html_escape::decode_html_entities(html[open_end..close].trim()).into_owned();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
