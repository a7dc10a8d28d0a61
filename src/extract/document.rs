//! Whole-document fallback: split a complete `<html>...</html>` document into
//! its markup, inline styles and inline scripts.

use regex::Regex;
use std::sync::LazyLock;

static DOCUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:<!doctype\s+html[^>]*>\s*)?<html\b.*</html\s*>").expect("document regex")
});
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>(.*?)</style\s*>").expect("style regex"));
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("script regex"));
static SRC_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bsrc\s*=").expect("src regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DocumentParts {
    pub html: String,
    pub css: String,
    pub js: String,
}

/// Find a complete HTML document in `text` and split it apart. Returns `None`
/// when no closed document is present.
pub(crate) fn split_document(text: &str) -> Option<DocumentParts> {
    let document = DOCUMENT.find(text)?.as_str();

    let css = STYLE_BLOCK
        .captures_iter(document)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let js = SCRIPT_BLOCK
        .captures_iter(document)
        .filter(|caps| caps.get(1).is_some_and(|attrs| !SRC_ATTR.is_match(attrs.as_str())))
        .filter_map(|caps| caps.get(2))
        .map(|m| m.as_str().trim())
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let html = STYLE_BLOCK.replace_all(document, "");
    let html = SCRIPT_BLOCK.replace_all(&html, "");

    Some(DocumentParts {
        html: html.trim().to_string(),
        css,
        js,
    })
}
