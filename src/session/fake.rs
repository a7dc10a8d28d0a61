//! Scripted completion backend for orchestrator and API tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::stream::{DEFAULT_MAX_CONSECUTIVE_FAILURES, delta_stream};
use crate::upstream::{BoxFuture, CompletionBackend, CompletionRequest, DeltaStream, UpstreamError};

pub(crate) enum Reply {
    /// Raw SSE body chunks, decoded like a real response body.
    Sse(Vec<Bytes>),
    /// SSE body chunks pushed by the test while the session runs.
    Channel(mpsc::UnboundedReceiver<Result<Bytes, UpstreamError>>),
    /// Deltas followed by a stream that never ends.
    Hang(Vec<String>),
    /// Whole response text for the single-response transport.
    Json(String),
    Fail(UpstreamError),
}

pub(crate) struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &CompletionRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Fail(UpstreamError::Stream("no scripted reply".into())))
    }
}

impl CompletionBackend for ScriptedBackend {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<String, UpstreamError>> {
        let reply = self.next(request);
        Box::pin(async move {
            match reply {
                Reply::Json(text) => Ok(text),
                Reply::Fail(err) => Err(err),
                _ => Err(UpstreamError::Decode("scripted reply is a stream".into())),
            }
        })
    }

    fn stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<DeltaStream, UpstreamError>> {
        let reply = self.next(request);
        Box::pin(async move {
            match reply {
                Reply::Sse(chunks) => Ok(delta_stream(
                    futures::stream::iter(chunks.into_iter().map(Ok::<_, UpstreamError>)),
                    DEFAULT_MAX_CONSECUTIVE_FAILURES,
                )),
                Reply::Channel(rx) => Ok(delta_stream(
                    UnboundedReceiverStream::new(rx),
                    DEFAULT_MAX_CONSECUTIVE_FAILURES,
                )),
                Reply::Hang(deltas) => {
                    let stream = futures::stream::iter(deltas.into_iter().map(Ok::<_, UpstreamError>))
                        .chain(futures::stream::pending::<Result<String, UpstreamError>>());
                    Ok(Box::pin(stream) as DeltaStream)
                }
                Reply::Json(text) => {
                    Ok(Box::pin(futures::stream::iter([Ok::<_, UpstreamError>(text)])) as DeltaStream)
                }
                Reply::Fail(err) => Err(err),
            }
        })
    }
}

/// SSE body delivering `deltas` and the `[DONE]` sentinel.
pub(crate) fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let frame = serde_json::json!({ "choices": [{ "delta": { "content": delta } }] });
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Split `body` into `pieces` byte chunks of roughly equal size.
pub(crate) fn chunks(body: &str, pieces: usize) -> Vec<Bytes> {
    let bytes = body.as_bytes();
    let size = bytes.len().div_ceil(pieces.max(1)).max(1);
    bytes
        .chunks(size)
        .map(Bytes::copy_from_slice)
        .collect()
}
