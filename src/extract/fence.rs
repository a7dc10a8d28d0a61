//! Incremental scanner for language-tagged code fences.
//!
//! The scanner walks the accumulated response text once, remembering where it
//! stopped. Each call to [`FenceScanner::scan`] resumes from that cursor, so
//! the total work over a stream is linear in its length. Positions that might
//! still change meaning when more text arrives (a partial opener line, a
//! partial terminator) are never consumed; the cursor parks in front of them.
//!
//! Rules:
//! - an opener is three backticks, a language tag, optional horizontal
//!   whitespace and a line break; it may appear anywhere in a line;
//! - a terminator is a line whose first non-blank characters are three
//!   backticks; it closes the open fence even without a trailing line break;
//! - a terminator line carrying a tag (```` ```css ````) also opens the next
//!   fence;
//! - fences with unknown or missing tags are skipped whole, so their bodies
//!   are not searched for openers;
//! - only the first fence of each kind is captured.

use crate::artifact::SectionKind;

const FENCE: &str = "```";

/// Byte range of one captured fence body inside the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FenceSpan {
    pub start: usize,
    /// End of the body (exclusive) once the terminator has been seen.
    pub end: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanState {
    SeekingFence,
    InFence { kind: SectionKind, body_start: usize },
    /// Inside a fence we do not capture (unknown tag, no tag, duplicate kind).
    InForeignFence { body_start: usize },
    /// Just closed a fence of `kind`; the cursor sits on the terminator's
    /// backticks, which may carry the tag of the next fence.
    Done(SectionKind),
    /// Just closed a foreign fence; same cursor rule as `Done`.
    ForeignDone,
}

#[derive(Debug, Clone)]
pub(crate) struct FenceScanner {
    cursor: usize,
    scanned_len: usize,
    state: ScanState,
    spans: [Option<FenceSpan>; 3],
}

enum Opener {
    /// A full opener line: the tag and the number of bytes consumed after the
    /// backticks, including the line break.
    Line { tag: TagKind, consumed: usize },
    /// Not enough text yet to decide.
    Incomplete,
}

enum TagKind {
    Section(SectionKind),
    Foreign,
    Missing,
}

impl FenceScanner {
    pub fn new() -> Self {
        Self {
            cursor: 0,
            scanned_len: 0,
            state: ScanState::SeekingFence,
            spans: [None; 3],
        }
    }

    /// Length of the buffer seen by the previous scan.
    pub fn scanned_len(&self) -> usize {
        self.scanned_len
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ScanState {
        self.state
    }

    pub fn span(&self, kind: SectionKind) -> Option<FenceSpan> {
        self.spans[kind.index()]
    }

    /// True once any section opener has been recognised.
    pub fn saw_section_opener(&self) -> bool {
        self.spans.iter().any(Option::is_some)
    }

    /// The kind whose fence is currently open.
    pub fn writing(&self) -> Option<SectionKind> {
        match self.state {
            ScanState::InFence { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Advance over `buffer`, which must extend the previously scanned text.
    pub fn scan(&mut self, buffer: &str) {
        self.scanned_len = buffer.len();

        loop {
            match self.state {
                ScanState::SeekingFence => {
                    let Some(found) = buffer[self.cursor..].find(FENCE) else {
                        // Leave room for a fence split across chunks.
                        self.cursor = tail_cursor(buffer, self.cursor, FENCE.len() - 1);
                        return;
                    };
                    let tick = self.cursor + found;
                    match parse_opener(&buffer[tick + FENCE.len()..]) {
                        Opener::Incomplete => {
                            self.cursor = tick;
                            return;
                        }
                        Opener::Line { tag, consumed } => {
                            let body_start = tick + FENCE.len() + consumed;
                            self.open(tag, body_start);
                        }
                    }
                }
                ScanState::Done(_) | ScanState::ForeignDone => {
                    let tick = self.cursor;
                    match parse_opener(&buffer[tick + FENCE.len()..]) {
                        Opener::Incomplete => return,
                        Opener::Line { tag, consumed } => {
                            let body_start = tick + FENCE.len() + consumed;
                            match tag {
                                TagKind::Section(_) | TagKind::Foreign => {
                                    self.open(tag, body_start)
                                }
                                // A bare terminator line; nothing opens.
                                TagKind::Missing => {
                                    self.cursor = body_start;
                                    self.state = ScanState::SeekingFence;
                                }
                            }
                        }
                    }
                }
                ScanState::InFence { body_start, .. }
                | ScanState::InForeignFence { body_start } => {
                    if !self.seek_terminator(buffer, body_start) {
                        return;
                    }
                }
            }
        }
    }

    fn open(&mut self, tag: TagKind, body_start: usize) {
        self.cursor = body_start;
        self.state = match tag {
            TagKind::Section(kind) if self.spans[kind.index()].is_none() => {
                self.spans[kind.index()] = Some(FenceSpan {
                    start: body_start,
                    end: None,
                });
                ScanState::InFence { kind, body_start }
            }
            _ => ScanState::InForeignFence { body_start },
        };
    }

    /// Walk body lines from the cursor. Returns true when a terminator closed
    /// the fence, false when more text is needed.
    fn seek_terminator(&mut self, buffer: &str, body_start: usize) -> bool {
        loop {
            let rest = &buffer[self.cursor..];
            let line_end = rest.find('\n');
            let line = &rest[..line_end.unwrap_or(rest.len())];
            let indent = line.len() - line.trim_start_matches([' ', '\t']).len();

            if line[indent..].starts_with(FENCE) {
                let end = body_end(buffer, body_start, self.cursor);
                self.state = match self.state {
                    ScanState::InFence { kind, .. } => {
                        if let Some(span) = self.spans[kind.index()].as_mut() {
                            span.end = Some(end);
                        }
                        ScanState::Done(kind)
                    }
                    _ => ScanState::ForeignDone,
                };
                self.cursor += indent;
                return true;
            }

            match line_end {
                Some(offset) => self.cursor += offset + 1,
                None => return false,
            }
        }
    }
}

impl Default for FenceScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Body end for a terminator line starting at `line_start`: the line break
/// before the terminator is not part of the body.
fn body_end(buffer: &str, body_start: usize, line_start: usize) -> usize {
    if line_start <= body_start {
        return body_start;
    }
    let mut end = line_start - 1;
    if end > body_start && buffer.as_bytes()[end - 1] == b'\r' {
        end -= 1;
    }
    end
}

/// Best-effort end of an unterminated body: drop a trailing line that could
/// still turn into a terminator, together with its line break.
pub(crate) fn open_body_end(buffer: &str, body_start: usize) -> usize {
    let body = &buffer[body_start..];
    let (line_start, last_line) = match body.rfind('\n') {
        Some(pos) => (pos, &body[pos + 1..]),
        None => (0, body),
    };
    let candidate = last_line.trim_start_matches([' ', '\t']).trim_end_matches('\r');
    if FENCE.starts_with(candidate) {
        let mut end = body_start + line_start;
        if end > body_start && buffer.as_bytes()[end - 1] == b'\r' {
            end -= 1;
        }
        end
    } else {
        buffer.len()
    }
}

fn parse_opener(rest: &str) -> Opener {
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.' | '#')))
        .unwrap_or(rest.len());
    let after_tag = &rest[tag_len..];
    let padding = after_tag.len() - after_tag.trim_start_matches([' ', '\t', '\r']).len();
    let after_padding = &after_tag[padding..];

    let Some(line_break) = after_padding.find('\n') else {
        return Opener::Incomplete;
    };

    let tag = &rest[..tag_len];
    let kind = if line_break > 0 {
        // Text after the tag on the opener line: not a section fence.
        TagKind::Foreign
    } else if tag.is_empty() {
        TagKind::Missing
    } else {
        SectionKind::from_fence_tag(tag)
            .map(TagKind::Section)
            .unwrap_or(TagKind::Foreign)
    };

    Opener::Line {
        tag: kind,
        consumed: tag_len + padding + line_break + 1,
    }
}

/// Cursor that keeps the last `keep` bytes for rescanning, on a char boundary.
fn tail_cursor(buffer: &str, cursor: usize, keep: usize) -> usize {
    let mut next = buffer.len().saturating_sub(keep).max(cursor);
    while !buffer.is_char_boundary(next) {
        next -= 1;
    }
    next.max(cursor)
}

// MARK: - Tests
