//! Content normalizer.
//!
//! Turns raw extracted sections into displayable, self-contained content:
//! HTML fragments get a minimal document shell, CSS and JavaScript get a
//! leading marker comment. Every function is pure and idempotent.
//!
//! Content that is still a prefix of a recognised lead-in (`<!DOCTYPE`,
//! `<html`, a comment opener) passes through untouched so that a streaming
//! section never flips between wrapped and unwrapped as it grows.

use crate::artifact::SectionKind;

/// Marker prepended to CSS that does not start with a comment.
pub const CSS_MARKER: &str = "/* Generated CSS */";

/// Marker prepended to JavaScript that does not start with a comment.
pub const JS_MARKER: &str = "// Generated JavaScript";

const HTML_LEAD_INS: [&str; 2] = ["<!doctype", "<html"];
const CSS_LEAD_INS: [&str; 1] = ["/*"];
const JS_LEAD_INS: [&str; 2] = ["//", "/*"];

/// Normalize content for the given section kind.
pub fn normalize(kind: SectionKind, content: &str) -> String {
    match kind {
        SectionKind::Html => normalize_html(content),
        SectionKind::Css => normalize_css(content),
        SectionKind::Js => normalize_js(content),
    }
}

/// Wrap an HTML fragment in a minimal document shell.
pub fn normalize_html(content: &str) -> String {
    let content = content.trim();
    if content.is_empty() || has_lead_in(content, &HTML_LEAD_INS) {
        return content.to_string();
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n\
         <title>Generated Website</title>\n</head>\n<body>\n{content}\n</body>\n</html>"
    )
}

/// Prefix CSS with [`CSS_MARKER`] unless it already opens with a comment.
pub fn normalize_css(content: &str) -> String {
    prefix_marker(content, CSS_MARKER, &CSS_LEAD_INS)
}

/// Prefix JavaScript with [`JS_MARKER`] unless it already opens with a comment.
pub fn normalize_js(content: &str) -> String {
    prefix_marker(content, JS_MARKER, &JS_LEAD_INS)
}

fn prefix_marker(content: &str, marker: &str, lead_ins: &[&str]) -> String {
    let content = content.trim();
    if content.is_empty() || has_lead_in(content, lead_ins) {
        return content.to_string();
    }
    format!("{marker}\n{content}")
}

/// Case-insensitive check that `content` starts with one of `lead_ins`, or is
/// itself a (possibly partial) prefix of one.
fn has_lead_in(content: &str, lead_ins: &[&str]) -> bool {
    lead_ins.iter().any(|lead_in| {
        let n = content.len().min(lead_in.len());
        content
            .get(..n)
            .is_some_and(|head| head.eq_ignore_ascii_case(&lead_in[..n]))
    })
}

// MARK: - Tests
