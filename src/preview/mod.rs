//! Sandboxed preview renderer.
//!
//! Builds one self-contained HTML document from a [`SiteArtifact`]. The
//! document carries its own error handling and navigation guards so that
//! half-written code from a live stream can be rendered after every chunk
//! without breaking the frame or navigating it away.

mod sanitize;

use std::sync::LazyLock;

use minijinja::{AutoEscape, Environment, context};
use tracing::error;

use crate::artifact::{SectionKind, SiteArtifact};

use self::sanitize::{sanitize_css, sanitize_html, script_literal};

/// Privileges granted to the preview frame. No top-level navigation.
pub const SANDBOX_PERMISSIONS: &str =
    "allow-scripts allow-same-origin allow-forms allow-popups allow-pointer-lock";

const PREVIEW_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Preview</title>
<script>
(function () {
  var PLACEHOLDER_IMAGE = "data:image/svg+xml,%3Csvg xmlns=%22http://www.w3.org/2000/svg%22 width=%22300%22 height=%22200%22%3E%3Crect width=%22100%25%22 height=%22100%25%22 fill=%22%23374151%22/%3E%3Ctext x=%2250%25%22 y=%2250%25%22 fill=%22%239ca3af%22 font-family=%22sans-serif%22 font-size=%2216%22 text-anchor=%22middle%22 dominant-baseline=%22middle%22%3EImage%3C/text%3E%3C/svg%3E";
  window.addEventListener("error", function (event) {
    var el = event.target;
    if (el && el.tagName === "IMG") {
      if (el.src !== PLACEHOLDER_IMAGE) { el.src = PLACEHOLDER_IMAGE; }
      event.preventDefault();
    } else if (el && el.tagName === "SCRIPT") {
      if (el.parentNode) { el.parentNode.removeChild(el); }
      event.preventDefault();
    }
  }, true);
  window.addEventListener("unhandledrejection", function (event) {
    console.warn("Unhandled rejection in preview:", event.reason);
    event.preventDefault();
  });
  document.addEventListener("click", function (event) {
    var el = event.target;
    while (el && el.nodeName !== "A") { el = el.parentNode; }
    if (!el) { return; }
    event.preventDefault();
    var href = el.getAttribute("href") || "";
    if (href.length > 1 && href.charAt(0) === "#") {
      var id = decodeURIComponent(href.slice(1));
      var target = document.getElementById(id) || document.getElementsByName(id)[0];
      if (target) { target.scrollIntoView({ behavior: "smooth", block: "start" }); }
    }
  }, true);
  document.addEventListener("submit", function (event) {
    event.preventDefault();
    console.log("Form submission is disabled in the preview.");
  }, true);
  window.open = function () { return null; };
})();
</script>
<style>
{{ css }}
</style>
</head>
<body>
{{ html }}
<script>
(function () {
  var source = {{ js_source }};
  function run() {
    var addDocumentListener = document.addEventListener;
    var addWindowListener = window.addEventListener;
    function lateReady(add, target) {
      return function (type, listener, options) {
        if ((type === "DOMContentLoaded" || type === "load") && typeof listener === "function") {
          setTimeout(function () {
            try { listener.call(target, new Event(type)); }
            catch (err) { console.error("Preview script error:", err); }
          }, 0);
          return;
        }
        return add.call(target, type, listener, options);
      };
    }
    document.addEventListener = lateReady(addDocumentListener, document);
    window.addEventListener = lateReady(addWindowListener, window);
    try {
      (new Function(source))();
    } catch (err) {
      console.error("Preview script error:", err);
    } finally {
      document.addEventListener = addDocumentListener;
      window.addEventListener = addWindowListener;
    }
  }
  if (document.readyState === "loading") {
    document.addEventListener("DOMContentLoaded", run);
  } else {
    run();
  }
})();
</script>
</body>
</html>
"##;

const FALLBACK_DOCUMENT: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"UTF-8\"><title>Preview</title></head>\n<body></body>\n</html>\n";

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.add_template("preview", PREVIEW_TEMPLATE)
        .expect("preview template");
    env
});

/// Render an artifact as a standalone preview document. Placeholder
/// sections render as empty.
pub fn render_document(artifact: &SiteArtifact) -> String {
    let html = artifact
        .content(SectionKind::Html)
        .map(sanitize_html)
        .unwrap_or_default();
    let css = artifact
        .content(SectionKind::Css)
        .map(sanitize_css)
        .unwrap_or_default();
    let js = artifact.content(SectionKind::Js).unwrap_or_default();

    let rendered = TEMPLATES.get_template("preview").and_then(|template| {
        template.render(context! {
            html => html,
            css => css,
            js_source => script_literal(js),
        })
    });

    match rendered {
        Ok(document) => document,
        Err(err) => {
            error!(error = %err, "Preview render error");
            FALLBACK_DOCUMENT.to_string()
        }
    }
}

/// Render an artifact inside a sandboxed `<iframe>` element.
pub fn render_iframe(artifact: &SiteArtifact) -> String {
    format!(
        "<iframe sandbox=\"{SANDBOX_PERMISSIONS}\" title=\"Website preview\" srcdoc=\"{}\"></iframe>",
        escape_attribute(&render_document(artifact))
    )
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + value.len() / 8);
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
