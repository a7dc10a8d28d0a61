//! Upstream Completion Client
//!
//! Talks to an OpenAI-compatible chat-completions endpoint (OpenRouter by
//! default), walking configured API keys and models until one answers.
//! Exposes a streaming and a single-response transport behind the
//! [`CompletionBackend`] trait so the session orchestrator can be driven by
//! a test double.

pub mod client;
pub mod prompt;
pub mod retry;
pub mod rotation;
pub mod types;

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::Stream;

use crate::upstream::types::ChatMessage;

pub use self::client::CompletionClient;
pub use self::retry::RetryPolicy;
pub use self::rotation::RotationState;

// ---------------------------------------------------------------------------
// UpstreamError
// ---------------------------------------------------------------------------

/// Errors raised while talking to the completion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("No API keys configured")]
    NoCredentials,

    #[error("No models configured for this request")]
    NoModels,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl UpstreamError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }

    /// Provider-supplied delay before the next attempt, if any.
    pub fn retry_after_duration(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<Infallible> for UpstreamError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// What the request asks the model to do. Selects the model list and the
/// token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    TextGeneration,
    ImageGeneration,
    Modification,
}

/// How the completion is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Incremental server-sent deltas.
    #[default]
    Stream,
    /// One JSON response carrying the whole completion.
    Single,
}

/// A fully built completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub kind: RequestKind,
    pub messages: Vec<ChatMessage>,
    /// Variant of `messages` for models without vision support. Only image
    /// requests carry one.
    pub text_only_messages: Option<Vec<ChatMessage>>,
}

// ---------------------------------------------------------------------------
// CompletionBackend trait
// ---------------------------------------------------------------------------

/// Stream of text deltas in arrival order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Source of completions for the session orchestrator.
///
/// Async methods return boxed futures so the trait stays dyn-compatible.
pub trait CompletionBackend: Send + Sync {
    /// Non-streaming completion returning the full response text.
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<String, UpstreamError>>;

    /// Streaming completion returning text deltas.
    fn stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<DeltaStream, UpstreamError>>;
}
