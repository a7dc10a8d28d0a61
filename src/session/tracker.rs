//! Per-kind display state for one session.
//!
//! Shown content only ever grows during a stream. Seeded content (the
//! artifact being modified) and placeholders count as empty, so the first
//! streamed value of a kind always replaces them.

use crate::artifact::{SectionKind, SiteArtifact};
use crate::extract::Extraction;
use crate::normalize::normalize;

#[derive(Debug, Clone)]
struct SectionState {
    shown: String,
    streamed: bool,
    complete: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SectionTracker {
    sections: [SectionState; 3],
}

impl SectionTracker {
    pub(crate) fn seeded(seed: &SiteArtifact) -> Self {
        let state = |kind: SectionKind| SectionState {
            shown: seed.get(kind).to_string(),
            streamed: false,
            complete: false,
        };
        Self {
            sections: [
                state(SectionKind::Html),
                state(SectionKind::Css),
                state(SectionKind::Js),
            ],
        }
    }

    /// Apply a mid-stream extraction. Returns the kinds whose shown content
    /// changed.
    pub(crate) fn apply(&mut self, extraction: &Extraction) -> Vec<SectionKind> {
        let mut changed = Vec::new();
        for kind in extraction.kinds() {
            let Some(section) = extraction.section(kind) else {
                continue;
            };
            let next = normalize(kind, &section.content);
            if next.is_empty() {
                continue;
            }

            let state = &mut self.sections[kind.index()];
            let shown_len = if state.streamed { state.shown.len() } else { 0 };
            if next.len() < shown_len || (state.streamed && next == state.shown) {
                continue;
            }
            state.shown = next;
            state.streamed = true;
            state.complete = section.complete;
            changed.push(kind);
        }
        changed
    }

    /// Apply the extraction over the complete buffer. It replaces whatever
    /// was shown for every kind it carries.
    pub(crate) fn finalize(&mut self, extraction: &Extraction) -> Vec<SectionKind> {
        let mut changed = Vec::new();
        for kind in extraction.kinds() {
            let Some(section) = extraction.section(kind) else {
                continue;
            };
            let next = normalize(kind, &section.content);
            if next.is_empty() {
                continue;
            }
            let state = &mut self.sections[kind.index()];
            if !state.streamed || state.shown != next {
                changed.push(kind);
            }
            state.shown = next;
            state.streamed = true;
            state.complete = section.complete;
        }
        changed
    }

    /// Kinds produced by this session's response.
    pub(crate) fn produced(&self) -> Vec<SectionKind> {
        SectionKind::ALL
            .into_iter()
            .filter(|kind| self.sections[kind.index()].streamed)
            .collect()
    }

    pub(crate) fn missing(&self) -> Vec<SectionKind> {
        SectionKind::ALL
            .into_iter()
            .filter(|kind| !self.sections[kind.index()].streamed)
            .collect()
    }

    /// Kinds whose closing fence has been seen.
    pub(crate) fn completed(&self) -> Vec<SectionKind> {
        SectionKind::ALL
            .into_iter()
            .filter(|kind| self.sections[kind.index()].complete)
            .collect()
    }

    pub(crate) fn artifact(&self) -> SiteArtifact {
        let mut artifact = SiteArtifact::default();
        for kind in SectionKind::ALL {
            artifact.set(kind, self.sections[kind.index()].shown.clone());
        }
        artifact.fill_placeholders();
        artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;

    #[test]
    fn test_first_streamed_value_replaces_seed() {
        let seed = SiteArtifact::from_parts("<p>a much longer original body</p>", "p{}", "");
        let mut tracker = SectionTracker::seeded(&seed);
        assert_eq!(tracker.artifact(), seed);

        let changed = tracker.apply(&extract("```css\nb"));
        assert_eq!(changed, vec![SectionKind::Css]);
        let artifact = tracker.artifact();
        assert_eq!(artifact.css, "/* Generated CSS */\nb");
        assert_eq!(artifact.html, seed.html);
        assert_eq!(tracker.produced(), vec![SectionKind::Css]);
    }

    #[test]
    fn test_unchanged_sections_are_not_reported() {
        let mut tracker = SectionTracker::seeded(&SiteArtifact::default());
        assert_eq!(tracker.apply(&extract("```html\n<p>x")), vec![SectionKind::Html]);
        assert!(tracker.apply(&extract("```html\n<p>x")).is_empty());
        assert!(tracker.completed().is_empty());
        assert_eq!(
            tracker.apply(&extract("```html\n<p>x</p>\n```\n")),
            vec![SectionKind::Html]
        );
        assert_eq!(tracker.completed(), vec![SectionKind::Html]);
    }

    #[test]
    fn test_shorter_value_is_ignored_mid_stream() {
        let mut tracker = SectionTracker::seeded(&SiteArtifact::default());
        tracker.apply(&extract("```js\nconsole.log('long')"));
        assert!(tracker.apply(&extract("```js\nx")).is_empty());
        assert!(tracker.artifact().js.contains("long"));
    }

    #[test]
    fn test_finalize_supersedes() {
        let mut tracker = SectionTracker::seeded(&SiteArtifact::default());
        tracker.apply(&extract("```js\nconsole.log('long')"));
        let changed = tracker.finalize(&extract("```js\nx\n```"));
        assert_eq!(changed, vec![SectionKind::Js]);
        assert_eq!(tracker.artifact().js, "// Generated JavaScript\nx");
        assert_eq!(tracker.missing(), vec![SectionKind::Html, SectionKind::Css]);
    }
}
