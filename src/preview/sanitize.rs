//! Clean-up passes applied to sections before they are inlined into the
//! preview document.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static SELF_CLOSING_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<script\b[^>]*/>").expect("self-closing script regex"));

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script regex"));

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("style regex"));

/// A script or style element that is still open at the end of the input.
static UNCLOSED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(?:script|style)\b.*$").expect("unclosed block regex"));

static LINK_STYLESHEET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*\brel\s*=\s*["']?stylesheet\b[^>]*>"#)
        .expect("stylesheet link regex")
});

/// An open tag. Quoted attribute values may contain `>`.
static OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([a-zA-Z][^\s/>]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#).expect("open tag regex")
});

/// Any complete tag, comment or declaration.
static COMPLETE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<!--.*?-->|<[a-zA-Z](?:[^>"']|"[^"]*"|'[^']*')*>|</[a-zA-Z][^>]*>|<![^>]*>"#)
        .expect("complete tag regex")
});

/// One attribute inside an open tag. Whitespace and `/` separate attributes.
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s/>"'=]+)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s>"']+))?"#).expect("attribute regex")
});

static PARTIAL_TAG_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[a-zA-Z/!]").expect("partial tag regex"));

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));

/// Elements whose content is not parsed as markup. Left open, they swallow
/// everything after them, injected scripts included.
const RAW_TEXT_ELEMENTS: [&str; 7] =
    ["textarea", "title", "noscript", "xmp", "iframe", "noembed", "noframes"];

/// Opening and closing patterns per raw text element. `<plaintext>` has no
/// closing tag.
static RAW_TEXT_TAGS: LazyLock<Vec<(Regex, Option<Regex>)>> = LazyLock::new(|| {
    let open = |name: &str| {
        Regex::new(&format!(r"(?i)<{name}(?:[\s/>]|$)")).expect("raw text open regex")
    };
    let mut tags: Vec<_> = RAW_TEXT_ELEMENTS
        .iter()
        .map(|name| {
            let close = Regex::new(&format!(r"(?i)</{name}\s*>")).expect("raw text close regex");
            (open(*name), Some(close))
        })
        .collect();
    tags.push((open("plaintext"), None));
    tags
});

static BODY_INNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<body\b[^>]*>(.*?)(?:</body\s*>|$)").expect("body regex")
});

static HEAD_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<head\b[^>]*>.*?(?:</head\s*>|$)").expect("head regex"));

static DOCUMENT_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!doctype[^>]*>|</?html\b[^>]*>|</?body\b[^>]*>").expect("document tag regex")
});

static CSS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)@import\b[^;\n]*;?").expect("import regex"));

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"']*))\s*\)"#).expect("url regex")
});

static STYLE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</style").expect("style close regex"));

// MARK: - HTML

/// Body markup that is safe to inline next to the injected style and script.
pub(crate) fn sanitize_html(html: &str) -> String {
    let inner = body_inner(html);
    let inner = COMMENT.replace_all(&inner, "");
    let inner = SELF_CLOSING_SCRIPT.replace_all(&inner, "");
    let inner = SCRIPT_BLOCK.replace_all(&inner, "");
    let inner = STYLE_BLOCK.replace_all(&inner, "");
    let inner = UNCLOSED_BLOCK.replace_all(&inner, "");
    let inner = truncate_unclosed(&inner);
    let inner = LINK_STYLESHEET.replace_all(&inner, "");
    let inner = OPEN_TAG.replace_all(&inner, |caps: &Captures| {
        strip_event_handlers(&caps[1], &caps[2])
    });
    drop_trailing_partial_tag(&inner).trim().to_string()
}

/// Cut the input at an unclosed comment or raw text element.
fn truncate_unclosed(html: &str) -> String {
    let mut html = html.to_string();
    if let Some(at) = html.find("<!--") {
        html.truncate(at);
    }
    loop {
        let cut = RAW_TEXT_TAGS
            .iter()
            .filter_map(|(open, close)| {
                let last_open = open.find_iter(&html).last()?.start();
                let closed = close.as_ref().is_some_and(|close| {
                    close
                        .find_iter(&html)
                        .last()
                        .is_some_and(|m| m.start() > last_open)
                });
                (!closed).then_some(last_open)
            })
            .min();
        match cut {
            Some(at) => html.truncate(at),
            None => return html,
        }
    }
}

/// Rebuild an open tag without `on*` attributes.
fn strip_event_handlers(name: &str, attributes: &str) -> String {
    let mut tag = format!("<{name}");
    let mut rest_start = 0;
    for caps in ATTRIBUTE.captures_iter(attributes) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        rest_start = whole.end;
        let attr = &caps[1];
        if attr.len() >= 2 && attr[..2].eq_ignore_ascii_case("on") {
            continue;
        }
        tag.push(' ');
        tag.push_str(&attributes[whole]);
    }
    if attributes[rest_start..].trim_end().ends_with('/') {
        tag.push_str(" /");
    }
    tag.push('>');
    tag
}

/// Drop a tag that is still being written at the end of the input.
fn drop_trailing_partial_tag(html: &str) -> &str {
    let complete_end = COMPLETE_TAG.find_iter(html).last().map_or(0, |m| m.end());
    match PARTIAL_TAG_START.find(&html[complete_end..]) {
        Some(m) => &html[..complete_end + m.start()],
        None => html,
    }
}

/// Content of `<body>`, or the input with document scaffolding removed when
/// there is no body yet.
fn body_inner(html: &str) -> String {
    if let Some(caps) = BODY_INNER.captures(html) {
        return caps.get(1).map_or("", |m| m.as_str()).to_string();
    }
    let without_head = HEAD_BLOCK.replace_all(html, "");
    DOCUMENT_TAGS.replace_all(&without_head, "").into_owned()
}

// MARK: - CSS

/// Stylesheet text with imports removed and remote references neutralised.
pub(crate) fn sanitize_css(css: &str) -> String {
    let css = CSS_IMPORT.replace_all(css, "");
    let css = CSS_URL.replace_all(&css, |caps: &Captures| {
        let target = (1..=3)
            .find_map(|i| caps.get(i))
            .map_or("", |m| m.as_str())
            .trim();
        if is_remote(target) {
            "url()".to_string()
        } else {
            caps[0].to_string()
        }
    });
    STYLE_CLOSE.replace_all(&css, r"<\/style").trim().to_string()
}

fn is_remote(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("data:") {
        return false;
    }
    lower.starts_with("//") || lower.contains("://")
}

// MARK: - JavaScript

/// JavaScript source as a JSON string literal that can sit inside a
/// `<script>` element.
pub(crate) fn script_literal(js: &str) -> String {
    serde_json::to_string(js)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", r"<\/")
        .replace("<!--", r"<\!--")
}
