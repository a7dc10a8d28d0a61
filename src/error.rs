use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::artifact::SectionKind;
use crate::upstream::UpstreamError;

/// Shown whenever the upstream rate limit could not be worked around.
pub const HIGH_DEMAND_MESSAGE: &str = "The AI models are currently experiencing high demand. \
Please try again in a few minutes or try with a text prompt instead.";

const NO_CONTENT_MESSAGE: &str = "The AI response did not contain any website code. \
Please try again, or switch between text and image input.";

const UPSTREAM_FAILED_MESSAGE: &str =
    "The AI service could not complete the request. Please try again.";

// ---------------------------------------------------------------------------
// GenerationError
// ---------------------------------------------------------------------------

/// Terminal failure of a generation or modification session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream request failed: {0}")]
    UpstreamRequestFailed(String),

    #[error("Upstream rate limit exhausted on every key and model")]
    RateLimited,

    #[error("Stream exceeded its {}s budget", .0.as_secs())]
    StreamTimeout(Duration),

    #[error("No code sections found in the response")]
    NoContentExtracted,

    /// A newer session started; never shown to users.
    #[error("Superseded by a newer session")]
    Superseded,
}

impl GenerationError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::UpstreamRequestFailed(_) => "upstream_request_failed",
            Self::RateLimited => "rate_limited",
            Self::StreamTimeout(_) => "stream_timeout",
            Self::NoContentExtracted => "no_content_extracted",
            Self::Superseded => "superseded",
        }
    }

    /// Short message suitable for end users. Provider details stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(reason) => reason.clone(),
            Self::UpstreamRequestFailed(_) => UPSTREAM_FAILED_MESSAGE.to_string(),
            Self::RateLimited => HIGH_DEMAND_MESSAGE.to_string(),
            Self::StreamTimeout(budget) => format!(
                "Generation took longer than {} seconds and was stopped. Please try again.",
                budget.as_secs()
            ),
            Self::NoContentExtracted => NO_CONTENT_MESSAGE.to_string(),
            Self::Superseded => "A newer request replaced this one.".to_string(),
        }
    }
}

impl From<UpstreamError> for GenerationError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::RateLimited { .. } => Self::RateLimited,
            other => Self::UpstreamRequestFailed(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionWarning
// ---------------------------------------------------------------------------

/// Soft warning attached to a successful session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionWarning {
    /// Fewer than three sections were produced.
    PartialContent { missing: Vec<SectionKind> },
    /// A modification kept the current content of these sections.
    Unchanged { unchanged: Vec<SectionKind> },
}

impl SessionWarning {
    pub fn message(&self) -> String {
        match self {
            Self::PartialContent { missing } => format!(
                "Only part of the website was generated; missing: {}.",
                kind_names(missing)
            ),
            Self::Unchanged { unchanged } => format!(
                "The response left part of the website unchanged: {}.",
                kind_names(unchanged)
            ),
        }
    }
}

fn kind_names(kinds: &[SectionKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// HTTP-facing error following the OpenAI error format.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// OpenAI-compatible error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    r#type: String,
    code: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::RateLimited(_) => "rate_limit_error",
            Self::Timeout(_) | Self::Upstream(_) => "api_error",
            Self::NotFound(_) => "not_found_error",
            Self::Internal(_) => "server_error",
        }
    }

    fn error_code(&self) -> Option<&str> {
        match self {
            Self::RateLimited(_) => Some("rate_limit_exceeded"),
            Self::Timeout(_) => Some("stream_timeout"),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
                code: self.error_code().map(String::from),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let message = err.user_message();
        match err {
            GenerationError::Validation(_) => Self::BadRequest(message),
            GenerationError::RateLimited => Self::RateLimited(message),
            GenerationError::StreamTimeout(_) => Self::Timeout(message),
            GenerationError::UpstreamRequestFailed(_) | GenerationError::NoContentExtracted => {
                Self::Upstream(message)
            }
            GenerationError::Superseded => Self::Internal(message),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
