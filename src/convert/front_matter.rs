//! Front matter parsing
//!
//! Page sources may open with a `~~~`-fenced YAML block:
//!
//! ```text
//! ~~~
//! CONTEXT:
//!   title: About
//! TEMPLATE:
//!   NAME: minimal
//!   CSS: "body { margin: 0 }"
//! ALLOWED_METHODS:
//!   - GET
//!   - POST
//! ~~~
//! # Body starts here
//! ```
//!
//! Everything is optional; a file without a fence is all body.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use super::ConvertError;

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\A~~~[ \t]*\n(.*?)\n~~~[ \t]*(?:\n|\z)").unwrap()
    })
}

/// Parsed front matter block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrontMatter {
    /// Arbitrary values handed to the template as `context`
    #[serde(rename = "CONTEXT", default)]
    pub context: BTreeMap<String, serde_yaml::Value>,

    /// Template selection and inline document snippets
    #[serde(rename = "TEMPLATE", default)]
    pub template: Option<TemplateSpec>,

    /// HTTP methods the page accepts; absent means read-only
    #[serde(rename = "ALLOWED_METHODS", default)]
    pub allowed_methods: Option<Vec<String>>,
}

/// The `TEMPLATE` sub-block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateSpec {
    /// Registered template name; absent means the default template
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,

    /// Raw HTML injected into the document head
    #[serde(rename = "HTML", default)]
    pub html: Option<String>,

    /// Inline stylesheet
    #[serde(rename = "CSS", default)]
    pub css: Option<String>,

    /// Inline script
    #[serde(rename = "JS", default)]
    pub js: Option<String>,
}

impl FrontMatter {
    /// Title from the front matter context, if declared
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.context
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Selected template name, defaulting when unset
    #[must_use]
    pub fn template_name(&self) -> &str {
        self.template
            .as_ref()
            .and_then(|t| t.name.as_deref())
            .unwrap_or(crate::render::DEFAULT_TEMPLATE)
    }

    /// Context converted to JSON values for the renderer
    #[must_use]
    pub fn context_json(&self) -> BTreeMap<String, serde_json::Value> {
        self.context
            .iter()
            .filter_map(|(k, v)| {
                serde_json::to_value(v).ok().map(|json| (k.clone(), json))
            })
            .collect()
    }
}

/// Split a page source into front matter and body.
///
/// A missing fence yields default front matter and the whole input as
/// body. A present but malformed YAML block is a task error.
pub fn parse(source: &str) -> Result<(FrontMatter, &str), ConvertError> {
    let Some(captures) = fence_regex().captures(source) else {
        return Ok((FrontMatter::default(), source));
    };

    let yaml = &captures[1];
    let front: FrontMatter =
        serde_yaml::from_str(yaml).map_err(|e| ConvertError::FrontMatter {
            detail: e.to_string(),
        })?;

    let body_start = captures.get(0).map(|m| m.end()).unwrap_or(0);
    Ok((front, &source[body_start..]))
}
