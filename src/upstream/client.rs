//! OpenRouter-compatible completion client.
//!
//! Walks an [`AttemptPlan`](super::rotation::AttemptPlan) for every request:
//! - a rate limit (after bounded retries) abandons the key and moves to the
//!   next one;
//! - any other API error moves to the next model of the same key;
//! - transport errors end the walk immediately.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::config::{StreamConfig, UpstreamConfig};
use crate::stream::delta_stream;
use crate::upstream::retry::{RetryPolicy, execute_with_retry};
use crate::upstream::rotation::{ApiKey, Attempt, RotationState};
use crate::upstream::types::{ChatMessage, ChatRequestBody, CompletionEnvelope};
use crate::upstream::{
    BoxFuture, CompletionBackend, CompletionRequest, DeltaStream, RequestKind, Transport,
    UpstreamError,
};

/// User-Agent header sent with every request.
const USER_AGENT: &str = concat!("zensite/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept for logs.
const MAX_LOGGED_BODY: usize = 512;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct CompletionClient {
    http: Client,
    config: UpstreamConfig,
    rotation: RotationState,
    retry: RetryPolicy,
    max_decode_failures: u32,
}

/// A model to try and whether it accepts image input.
struct ModelChoice<'a> {
    name: &'a str,
    vision: bool,
}

enum Reply {
    Streaming(DeltaStream),
    Full(String),
}

impl CompletionClient {
    pub fn new(
        config: UpstreamConfig,
        retry: RetryPolicy,
        stream: &StreamConfig,
    ) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .build()?;
        let rotation = RotationState::new(config.resolved_api_keys());

        Ok(Self {
            http,
            config,
            rotation,
            retry,
            max_decode_failures: stream.max_consecutive_decode_failures,
        })
    }

    pub fn rotation(&self) -> &RotationState {
        &self.rotation
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Models for a request kind, in fallback order. Image requests try the
    /// vision models first, then text models with the text-only prompt.
    fn models_for(&self, kind: RequestKind) -> Vec<ModelChoice<'_>> {
        let text = self.config.text_models.iter().map(|name| ModelChoice {
            name,
            vision: false,
        });
        match kind {
            RequestKind::ImageGeneration => self
                .config
                .vision_models
                .iter()
                .map(|name| ModelChoice { name, vision: true })
                .chain(text)
                .collect(),
            RequestKind::TextGeneration | RequestKind::Modification => text.collect(),
        }
    }

    fn max_tokens_for(&self, kind: RequestKind) -> u32 {
        match kind {
            RequestKind::ImageGeneration => self.config.image_max_tokens,
            RequestKind::TextGeneration | RequestKind::Modification => self.config.max_tokens,
        }
    }

    async fn run(
        &self,
        request: &CompletionRequest,
        transport: Transport,
    ) -> Result<Reply, UpstreamError> {
        if self.rotation.is_empty() {
            return Err(UpstreamError::NoCredentials);
        }
        let models = self.models_for(request.kind);
        if models.is_empty() {
            return Err(UpstreamError::NoModels);
        }

        let max_tokens = self.max_tokens_for(request.kind);
        let mut plan = self.rotation.plan(models.len());
        let mut last_error: Option<UpstreamError> = None;
        let mut rate_limit: Option<UpstreamError> = None;
        let mut rate_limited_keys = 0;

        while let Some(attempt) = plan.next_attempt() {
            let model = &models[attempt.model_index];
            let messages = match (&request.text_only_messages, model.vision) {
                (Some(text_only), false) => text_only.as_slice(),
                _ => request.messages.as_slice(),
            };

            let result = execute_with_retry(&self.retry, || {
                self.attempt(&attempt, model.name, messages, max_tokens, transport)
            })
            .await;

            match result {
                Ok(reply) => {
                    self.rotation.record_success(attempt.key_index);
                    info!(
                        key_index = attempt.key_index,
                        model = model.name,
                        kind = ?request.kind,
                        "Upstream request accepted"
                    );
                    return Ok(reply);
                }
                Err(error) if error.is_rate_limited() => {
                    warn!(
                        key_index = attempt.key_index,
                        model = model.name,
                        "Key rate limited, moving to next key"
                    );
                    plan.skip_key();
                    rate_limited_keys += 1;
                    rate_limit = Some(error);
                }
                Err(UpstreamError::Http(error)) => return Err(UpstreamError::Http(error)),
                Err(error) => {
                    warn!(
                        key_index = attempt.key_index,
                        model = model.name,
                        error = %error,
                        "Model failed, trying next model"
                    );
                    last_error = Some(error);
                }
            }
        }

        // Every key ending in a 429 outranks earlier model errors.
        match last_error {
            Some(error) if rate_limited_keys < self.rotation.len() => Err(error),
            _ => Err(rate_limit.unwrap_or(UpstreamError::RateLimited { retry_after: None })),
        }
    }

    async fn attempt(
        &self,
        attempt: &Attempt<'_>,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        transport: Transport,
    ) -> Result<Reply, UpstreamError> {
        let body = ChatRequestBody {
            model,
            messages,
            stream: transport == Transport::Stream,
            temperature: self.config.temperature,
            max_tokens,
            top_p: self.config.top_p,
        };

        debug!(key_index = attempt.key_index, model, ?transport, "Sending completion request");
        let response = self.send(attempt.key, &body).await?;

        match transport {
            Transport::Stream => Ok(Reply::Streaming(delta_stream(
                response.bytes_stream(),
                self.max_decode_failures,
            ))),
            Transport::Single => {
                let envelope: CompletionEnvelope = response
                    .json()
                    .await
                    .map_err(|e| UpstreamError::Decode(e.to_string()))?;
                if let Some(error) = envelope.error.as_ref() {
                    warn!(model, code = ?error.code, message = %error.message, "Provider error in response body");
                    return Err(if error.is_rate_limit() {
                        UpstreamError::RateLimited { retry_after: None }
                    } else {
                        UpstreamError::Api {
                            status: error.status().unwrap_or(StatusCode::BAD_GATEWAY.as_u16()),
                            message: error.message.clone(),
                        }
                    });
                }
                match envelope.into_content() {
                    Some(content) if !content.trim().is_empty() => Ok(Reply::Full(content)),
                    _ => Err(UpstreamError::Decode("response carried no content".to_string())),
                }
            }
        }
    }

    async fn send(
        &self,
        key: &ApiKey,
        body: &ChatRequestBody<'_>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(key.expose())
            .header("HTTP-Referer", &self.config.site_url)
            .header("X-Title", &self.config.app_title)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(response.headers());
            debug!(?retry_after, "Upstream returned 429");
            return Err(UpstreamError::RateLimited { retry_after });
        }

        let text = response.text().await.unwrap_or_default();
        let message: String = text.chars().take(MAX_LOGGED_BODY).collect();
        warn!(status = status.as_u16(), body = %message, "Upstream returned an error status");
        Err(UpstreamError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl CompletionBackend for CompletionClient {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<String, UpstreamError>> {
        Box::pin(async move {
            match self.run(request, Transport::Single).await? {
                Reply::Full(content) => Ok(content),
                Reply::Streaming(_) => Err(UpstreamError::Decode(
                    "expected a single response".to_string(),
                )),
            }
        })
    }

    fn stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<DeltaStream, UpstreamError>> {
        Box::pin(async move {
            match self.run(request, Transport::Stream).await? {
                Reply::Streaming(stream) => Ok(stream),
                Reply::Full(content) => {
                    Ok(Box::pin(futures::stream::once(async move {
                    Ok::<_, UpstreamError>(content)
                })) as DeltaStream)
                }
            }
        })
    }
}
