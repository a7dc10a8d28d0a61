//! SSE byte-stream framing.
//!
//! Decodes UTF-8 incrementally across read boundaries, holds partial lines
//! over to the next read, and yields `data: ` payloads in arrival order.

use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// One framed SSE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A `data: ` payload with the prefix stripped.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Stateful SSE frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Decoded text after the last line break.
    holdover: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read from the response body and return every complete frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.decode_utf8(chunk);

        let mut frames = Vec::new();
        while let Some(newline_pos) = self.holdover.find('\n') {
            let line: String = self.holdover.drain(..=newline_pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                frames.push(Frame::Done);
            } else {
                frames.push(Frame::Data(payload.to_string()));
            }
        }
        frames
    }

    /// End of stream. Any unterminated line is dropped.
    pub fn finish(&mut self) {
        if !self.holdover.is_empty() || !self.pending.is_empty() {
            debug!(
                holdover_len = self.holdover.len(),
                pending_bytes = self.pending.len(),
                "Discarding unterminated SSE line at end of stream"
            );
        }
        self.holdover.clear();
        self.pending.clear();
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.holdover.push_str(text);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // Safe: `valid_up_to` marks the end of a valid prefix.
                    self.holdover
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            self.holdover.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
    }
}
