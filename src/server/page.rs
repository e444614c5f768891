//! HTML page served at `/`.

use std::path::Path;

use crate::config::PageConfig;
use crate::error::{RelayError, Result};

/// Template compiled into the binary.
pub const EMBEDDED_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Placeholder the client script needs to find the relay socket.
///
/// It sits inside a `<script>` block, so it is filled with a JS string
/// literal (quotes included) rather than HTML-escaped text.
const WS_PATH_PLACEHOLDER: &str = "{{ws_path}}";

/// Text shown until the first event arrives.
pub const LOADING_TEXT: &str = "Loading...";

/// Values substituted into the page template.
#[derive(Debug, Clone)]
pub struct PageVars<'a> {
    pub title: &'a str,
    pub ws_path: &'a str,
    pub loading: &'a str,
}

/// A page template with `{{name}}` placeholders.
#[derive(Debug, Clone)]
pub struct PageTemplate {
    source: String,
}

impl PageTemplate {
    pub fn embedded() -> Self {
        Self {
            source: EMBEDDED_TEMPLATE.to_string(),
        }
    }

    /// Load a custom template from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Template(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_source(source)
    }

    pub fn from_source(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        if !source.contains(WS_PATH_PLACEHOLDER) {
            return Err(RelayError::Template(format!(
                "Template is missing the {} placeholder",
                WS_PATH_PLACEHOLDER
            )));
        }
        Ok(Self { source })
    }

    /// Embedded template unless the config names a file.
    pub fn from_config(config: &PageConfig) -> Result<Self> {
        match &config.template_path {
            Some(path) => Self::load(path),
            None => Ok(Self::embedded()),
        }
    }

    pub fn render(&self, vars: &PageVars<'_>) -> String {
        self.source
            .replace("{{title}}", &html_escape(vars.title))
            .replace(WS_PATH_PLACEHOLDER, &js_string(vars.ws_path))
            .replace("{{loading}}", &html_escape(vars.loading))
    }
}

/// HTML-escape a string to prevent XSS.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Encode a string as a JS string literal safe to embed in a `<script>` block.
fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string().replace("</", "<\\/")
}
