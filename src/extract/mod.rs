//! Incremental code-block extractor.
//!
//! Given the full accumulated response text, reports the best current content
//! of each [`SectionKind`] and whether its fence has been closed. Extraction
//! always reads the whole buffer; a streaming [`Extractor`] only remembers how
//! far it has already scanned so repeated calls stay cheap. The result for a
//! buffer never depends on how that buffer was chunked on arrival.
//!
//! Fenced blocks take precedence. When no section fence has been opened the
//! extractor falls back to locating a complete `<html>...</html>` document and
//! splitting out its inline styles and scripts.

mod document;
mod fence;

use crate::artifact::SectionKind;
use fence::{FenceScanner, open_body_end};
use serde::Serialize;

// MARK: - Types

/// Current content of one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedSection {
    pub content: String,
    /// True once the closing terminator has been seen.
    pub complete: bool,
}

/// Where the extracted sections came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Nothing recognisable yet.
    None,
    /// Language-tagged code fences.
    Fenced,
    /// A whole HTML document with inline assets.
    Document,
}

/// Snapshot of every section for one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    sections: [Option<ExtractedSection>; 3],
    pub source: ExtractionSource,
    /// Kind of the fence that is open at the end of the buffer.
    pub writing: Option<SectionKind>,
}

impl Extraction {
    fn empty() -> Self {
        Self {
            sections: [None, None, None],
            source: ExtractionSource::None,
            writing: None,
        }
    }

    pub fn section(&self, kind: SectionKind) -> Option<&ExtractedSection> {
        self.sections[kind.index()].as_ref()
    }

    /// Kinds present in this extraction, in display order.
    pub fn kinds(&self) -> impl Iterator<Item = SectionKind> + '_ {
        SectionKind::ALL
            .into_iter()
            .filter(|kind| self.sections[kind.index()].is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(Option::is_none)
    }
}

// MARK: - Extractor

/// Streaming extractor. Feed it the whole buffer after every chunk.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    scanner: FenceScanner,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract from the full accumulated `buffer`.
    ///
    /// Successive calls are expected to pass a growing buffer; a shorter
    /// buffer restarts the scan from the beginning.
    pub fn extract(&mut self, buffer: &str) -> Extraction {
        if buffer.len() < self.scanner.scanned_len() {
            self.scanner = FenceScanner::new();
        }
        self.scanner.scan(buffer);

        if !self.scanner.saw_section_opener() {
            return document_fallback(buffer);
        }

        let mut extraction = Extraction::empty();
        extraction.source = ExtractionSource::Fenced;
        extraction.writing = self.scanner.writing();
        for kind in SectionKind::ALL {
            let Some(span) = self.scanner.span(kind) else {
                continue;
            };
            let end = span
                .end
                .unwrap_or_else(|| open_body_end(buffer, span.start));
            extraction.sections[kind.index()] = Some(ExtractedSection {
                content: buffer[span.start..end].to_string(),
                complete: span.end.is_some(),
            });
        }
        extraction
    }

    pub fn reset(&mut self) {
        self.scanner = FenceScanner::new();
    }
}

/// One-shot extraction over a complete buffer.
pub fn extract(buffer: &str) -> Extraction {
    Extractor::new().extract(buffer)
}

fn document_fallback(buffer: &str) -> Extraction {
    let Some(parts) = document::split_document(buffer) else {
        return Extraction::empty();
    };

    let mut extraction = Extraction::empty();
    extraction.source = ExtractionSource::Document;
    for (kind, content) in [
        (SectionKind::Html, parts.html),
        (SectionKind::Css, parts.css),
        (SectionKind::Js, parts.js),
    ] {
        if !content.is_empty() {
            extraction.sections[kind.index()] = Some(ExtractedSection {
                content,
                complete: true,
            });
        }
    }
    extraction
}

// MARK: - Tests
