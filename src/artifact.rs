//! The three code sections that make up a generated website.
//!
//! A [`SiteArtifact`] always holds a value for every [`SectionKind`]. A
//! section that has not been produced yet holds its placeholder string, which
//! the preview renderer treats as empty.

use serde::{Deserialize, Serialize};
use std::fmt;

// MARK: - Placeholders

/// Placeholder shown for the HTML section before any content arrives.
pub const HTML_PLACEHOLDER: &str = "<!-- HTML code will appear here -->";

/// Placeholder shown for the CSS section before any content arrives.
pub const CSS_PLACEHOLDER: &str = "/* CSS code will appear here */";

/// Placeholder shown for the JavaScript section before any content arrives.
pub const JS_PLACEHOLDER: &str = "// JavaScript code will appear here";

// MARK: - Section Kind

/// One of the three fixed code sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Html,
    Css,
    Js,
}

impl SectionKind {
    /// All kinds in display order.
    pub const ALL: [SectionKind; 3] = [SectionKind::Html, SectionKind::Css, SectionKind::Js];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Html => "html",
            SectionKind::Css => "css",
            SectionKind::Js => "js",
        }
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            SectionKind::Html => HTML_PLACEHOLDER,
            SectionKind::Css => CSS_PLACEHOLDER,
            SectionKind::Js => JS_PLACEHOLDER,
        }
    }

    /// Stable array index, used for per-kind state tables.
    pub(crate) fn index(self) -> usize {
        match self {
            SectionKind::Html => 0,
            SectionKind::Css => 1,
            SectionKind::Js => 2,
        }
    }

    /// Map a fence language tag to a section kind (case-insensitive).
    pub fn from_fence_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "html" | "htm" => Some(SectionKind::Html),
            "css" => Some(SectionKind::Css),
            "javascript" | "js" => Some(SectionKind::Js),
            _ => None,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// MARK: - Site Artifact

/// The HTML, CSS and JavaScript of one generated website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteArtifact {
    pub html: String,
    pub css: String,
    pub js: String,
}

impl SiteArtifact {
    /// Build an artifact from raw parts. Blank parts become placeholders.
    pub fn from_parts(
        html: impl Into<String>,
        css: impl Into<String>,
        js: impl Into<String>,
    ) -> Self {
        let mut artifact = Self {
            html: html.into(),
            css: css.into(),
            js: js.into(),
        };
        artifact.fill_placeholders();
        artifact
    }

    pub fn get(&self, kind: SectionKind) -> &str {
        match kind {
            SectionKind::Html => &self.html,
            SectionKind::Css => &self.css,
            SectionKind::Js => &self.js,
        }
    }

    pub fn set(&mut self, kind: SectionKind, content: String) {
        match kind {
            SectionKind::Html => self.html = content,
            SectionKind::Css => self.css = content,
            SectionKind::Js => self.js = content,
        }
    }

    /// Whether the section holds no real content (blank or its placeholder).
    pub fn is_placeholder(&self, kind: SectionKind) -> bool {
        let value = self.get(kind).trim();
        value.is_empty() || value == kind.placeholder()
    }

    /// The section content, or `None` when it is still a placeholder.
    pub fn content(&self, kind: SectionKind) -> Option<&str> {
        (!self.is_placeholder(kind)).then(|| self.get(kind))
    }

    /// True when at least one section holds real content.
    pub fn has_content(&self) -> bool {
        SectionKind::ALL.iter().any(|kind| !self.is_placeholder(*kind))
    }

    /// Kinds still holding placeholders.
    pub fn missing_kinds(&self) -> Vec<SectionKind> {
        SectionKind::ALL
            .into_iter()
            .filter(|kind| self.is_placeholder(*kind))
            .collect()
    }

    /// Replace blank sections with their placeholders.
    pub fn fill_placeholders(&mut self) {
        for kind in SectionKind::ALL {
            if self.get(kind).trim().is_empty() {
                self.set(kind, kind.placeholder().to_string());
            }
        }
    }
}

impl Default for SiteArtifact {
    fn default() -> Self {
        Self {
            html: HTML_PLACEHOLDER.to_string(),
            css: CSS_PLACEHOLDER.to_string(),
            js: JS_PLACEHOLDER.to_string(),
        }
    }
}

// MARK: - Tests
