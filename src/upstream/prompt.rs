//! Prompt construction for the three request kinds.

use crate::artifact::{SectionKind, SiteArtifact};
use crate::upstream::types::{ChatMessage, ContentPart, ImageUrl};
use crate::upstream::{CompletionRequest, RequestKind};

const TITLE_CHARS: usize = 50;

const GENERATION_RULES: &str = "You are an expert front-end developer. Answer with exactly three \
fenced code blocks in this order: ```html, ```css and ```javascript. Every block must be complete. \
Do not link external stylesheets or scripts; all styling belongs in the css block and all \
behaviour in the javascript block. Never use external placeholder image services; draw images \
with inline SVG, CSS gradients or emoji instead. Keep prose outside the blocks to a minimum.";

const MODIFICATION_RULES: &str = "You are an expert front-end developer editing an existing \
website. Apply the user's instruction and answer with the complete updated code as exactly three \
fenced code blocks in this order: ```html, ```css and ```javascript. Include every block in full, \
even when a block did not change. Do not link external stylesheets or scripts and never use \
external placeholder image services.";

const NO_HTML: &str = "<!-- No HTML provided -->";
const NO_CSS: &str = "/* No CSS provided */";
const NO_JS: &str = "// No JavaScript provided";

fn format_template(title: &str) -> String {
    format!(
        "Use this format:\n\
         ```html\n<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{title}</title>\n</head>\n<body>\n  <!-- page content -->\n</body>\n</html>\n```\n\
         ```css\n/* page styles */\n```\n\
         ```javascript\n// page behaviour\n```"
    )
}

/// Page title derived from the first characters of a prompt.
fn title_from(prompt: &str) -> String {
    let title: String = prompt.trim().chars().take(TITLE_CHARS).collect();
    title.replace(['<', '>'], "")
}

/// Fresh generation from a text description.
pub fn text_generation(prompt: &str) -> CompletionRequest {
    let prompt = prompt.trim();
    let user = format!(
        "Create a dark theme, responsive, reactive, eye-catching website: {prompt}\n\n{}",
        format_template(&title_from(prompt))
    );

    CompletionRequest {
        kind: RequestKind::TextGeneration,
        messages: vec![ChatMessage::system(GENERATION_RULES), ChatMessage::user(user)],
        text_only_messages: None,
    }
}

/// Fresh generation from a screenshot or mockup, given as a data URL.
pub fn image_generation(image_data_url: &str, aux_instruction: Option<&str>) -> CompletionRequest {
    let extra = aux_instruction
        .map(str::trim)
        .filter(|aux| !aux.is_empty())
        .map(|aux| format!("\n\nAdditional instructions: {aux}"))
        .unwrap_or_default();

    let vision_text = format!(
        "{GENERATION_RULES}\n\nAnalyse the attached image and build a website that reproduces \
         its layout, colour scheme, typography and content as closely as possible. Make it \
         responsive and interactive.{extra}\n\n{}",
        format_template("Generated Website")
    );

    let text_only = format!(
        "Create a dark theme, responsive, reactive, eye-catching website for a modern product \
         landing page with a hero section, feature cards and a contact form.{extra}\n\n{}",
        format_template("Generated Website")
    );

    CompletionRequest {
        kind: RequestKind::ImageGeneration,
        messages: vec![ChatMessage::user_parts(vec![
            ContentPart::Text { text: vision_text },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_data_url.to_string(),
                },
            },
        ])],
        text_only_messages: Some(vec![
            ChatMessage::system(GENERATION_RULES),
            ChatMessage::user(text_only),
        ]),
    }
}

/// Edit of an existing artifact.
pub fn modification(current: &SiteArtifact, instruction: &str) -> CompletionRequest {
    let section = |kind: SectionKind, fallback: &'static str| {
        current.content(kind).map(str::trim).unwrap_or(fallback).to_string()
    };
    let html = section(SectionKind::Html, NO_HTML);
    let css = section(SectionKind::Css, NO_CSS);
    let js = section(SectionKind::Js, NO_JS);

    let user = format!(
        "Current HTML:\n```html\n{html}\n```\n\n\
         Current CSS:\n```css\n{css}\n```\n\n\
         Current JavaScript:\n```javascript\n{js}\n```\n\n\
         User instruction: {}",
        instruction.trim()
    );

    CompletionRequest {
        kind: RequestKind::Modification,
        messages: vec![ChatMessage::system(MODIFICATION_RULES), ChatMessage::user(user)],
        text_only_messages: None,
    }
}
