//! Streaming frame decoder.
//!
//! Turns the raw byte stream of an SSE completion response into an ordered
//! stream of text deltas. Framing lives in [`frame`]; this module decodes
//! each payload's JSON envelope and enforces the failure policy: undecodable
//! payloads are skipped, too many in a row end the stream, and a stream that
//! ends without a single valid delta after decode failures is an error.

pub mod frame;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::upstream::types::StreamEnvelope;
use crate::upstream::{DeltaStream, UpstreamError};

pub use self::frame::{Frame, FrameDecoder};

/// Default number of consecutive undecodable payloads tolerated.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 20;

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEvent {
    Text(String),
    /// Keep-alive, role-only or undecodable payload.
    Skip,
    Done,
}

/// Decodes frame payloads into text deltas.
#[derive(Debug)]
pub struct DeltaDecoder {
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    total_failures: u32,
    deltas: u64,
}

impl DeltaDecoder {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            max_consecutive_failures: max_consecutive_failures.max(1),
            consecutive_failures: 0,
            total_failures: 0,
            deltas: 0,
        }
    }

    pub fn decode(&mut self, frame: Frame) -> Result<DeltaEvent, UpstreamError> {
        let payload = match frame {
            Frame::Done => return Ok(DeltaEvent::Done),
            Frame::Data(payload) => payload,
        };

        let envelope = match serde_json::from_str::<StreamEnvelope>(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.consecutive_failures += 1;
                self.total_failures += 1;
                debug!(
                    error = %e,
                    consecutive = self.consecutive_failures,
                    "Skipping undecodable stream payload"
                );
                if self.consecutive_failures >= self.max_consecutive_failures {
                    return Err(UpstreamError::Stream(format!(
                        "{} consecutive undecodable stream payloads",
                        self.consecutive_failures
                    )));
                }
                return Ok(DeltaEvent::Skip);
            }
        };
        self.consecutive_failures = 0;

        if let Some(error) = envelope.error.as_ref() {
            warn!(
                code = ?error.code,
                message = %error.message,
                "Upstream reported an error mid-stream"
            );
            return Err(if error.is_rate_limit() {
                UpstreamError::RateLimited { retry_after: None }
            } else {
                UpstreamError::Stream("upstream reported an error mid-stream".to_string())
            });
        }

        match envelope.into_delta() {
            Some(text) if !text.is_empty() => {
                self.deltas += 1;
                Ok(DeltaEvent::Text(text))
            }
            _ => Ok(DeltaEvent::Skip),
        }
    }

    /// End-of-stream check.
    pub fn finish(&self) -> Result<(), UpstreamError> {
        if self.deltas == 0 && self.total_failures > 0 {
            return Err(UpstreamError::Stream(format!(
                "stream ended without a valid delta ({} undecodable payloads)",
                self.total_failures
            )));
        }
        Ok(())
    }

    pub fn delta_count(&self) -> u64 {
        self.deltas
    }
}

/// Decode a response body into text deltas. The stream ends at `[DONE]` or
/// when the body ends, whichever comes first.
pub fn delta_stream<S, E>(body: S, max_consecutive_failures: u32) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<UpstreamError> + Send + 'static,
{
    Box::pin(decode_body(body, max_consecutive_failures))
}

fn decode_body<S, E>(
    body: S,
    max_consecutive_failures: u32,
) -> impl Stream<Item = Result<String, UpstreamError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<UpstreamError> + Send + 'static,
{
    async_stream::try_stream! {
        let mut body = Box::pin(body);
        let mut frames = FrameDecoder::new();
        let mut deltas = DeltaDecoder::new(max_consecutive_failures);

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Into::<UpstreamError>::into)?;
            for frame in frames.feed(&chunk) {
                match deltas.decode(frame)? {
                    DeltaEvent::Text(text) => yield text,
                    DeltaEvent::Skip => {}
                    DeltaEvent::Done => break 'read,
                }
            }
        }

        frames.finish();
        deltas.finish()?;
        debug!(deltas = deltas.delta_count(), "Stream finished");
    }
}

// MARK: - Tests
