use std::convert::Infallible;
use std::future::Future;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error};

use crate::AppState;
use crate::artifact::SiteArtifact;
use crate::error::{AppError, GenerationError};
use crate::session::{
    EventSender, GenerationRequest, ModificationRequest, SessionEvent, SessionOutcome,
};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Text,
    Image,
}

/// Body of `POST /api/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub mode: InputMode,
    #[serde(default)]
    pub prompt: Option<String>,
    /// `data:<mime>;base64,<payload>` URL of the uploaded image.
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub aux_instruction: Option<String>,
}

impl GenerateBody {
    fn into_request(self) -> Result<GenerationRequest, GenerationError> {
        match self.mode {
            InputMode::Text => {
                let request = GenerationRequest::text(self.prompt.unwrap_or_default());
                request.validate()?;
                Ok(request)
            }
            InputMode::Image => {
                let image = self
                    .image_data
                    .filter(|data| !data.trim().is_empty())
                    .ok_or_else(|| {
                        GenerationError::Validation("Please upload an image.".to_string())
                    })?;
                GenerationRequest::from_data_url(&image, self.aux_instruction)
            }
        }
    }
}

/// Body of `POST /api/modify`.
#[derive(Debug, Deserialize)]
pub struct ModifyBody {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub js: String,
    #[serde(default)]
    pub instruction: String,
}

impl ModifyBody {
    fn into_request(self) -> Result<ModificationRequest, GenerationError> {
        let request = ModificationRequest::new(
            SiteArtifact::from_parts(self.html, self.css, self.js),
            self.instruction,
        );
        request.validate()?;
        Ok(request)
    }
}

/// POST /api/generate
///
/// Validates the request, then streams the session as SSE events.
pub async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(body) = body?;
    let request = body.into_request()?;
    let orchestrator = state.orchestrator();

    Ok(session_events(move |events| async move {
        orchestrator.generate(request, &events).await
    }))
}

/// POST /api/modify
pub async fn modify(
    State(state): State<AppState>,
    body: Result<Json<ModifyBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(body) = body?;
    let request = body.into_request()?;
    let orchestrator = state.orchestrator();

    Ok(session_events(move |events| async move {
        orchestrator.modify(request, &events).await
    }))
}

/// Run a session in the background and forward its events as SSE. The
/// session is dropped, aborting the upstream request, once the client goes
/// away.
fn session_events<F, Fut>(run: F) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: FnOnce(EventSender) -> Fut,
    Fut: Future<Output = Result<SessionOutcome, GenerationError>> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = tx.clone();
    let session = run(tx);

    tokio::spawn(async move {
        tokio::select! {
            _ = session => {}
            _ = watcher.closed() => debug!("Client disconnected, abandoning session"),
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(to_sse_event(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &SessionEvent) -> Event {
    let name = match event {
        SessionEvent::Started { .. } => "started",
        SessionEvent::Update { .. } => "update",
        SessionEvent::Completed { .. } => "completed",
        SessionEvent::Failed { .. } => "failed",
    };
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(name).data(json),
        Err(err) => {
            error!(error = %err, "Failed to serialize session event");
            Event::default().event("failed").data(
                serde_json::json!({
                    "event": "failed",
                    "session_id": event.session_id(),
                    "kind": "internal",
                    "message": "Internal error",
                })
                .to_string(),
            )
        }
    }
}
