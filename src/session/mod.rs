//! Generation/modification orchestrator.
//!
//! Drives one session at a time through
//! `Idle -> Submitting -> Streaming -> Finalizing -> Success | Failed`.
//! Every decoded delta re-runs extraction over the accumulated buffer and
//! publishes the kinds that changed. Each session gets an increasing id;
//! starting a new session makes the old one stale, and a stale session stops
//! at its next delta without publishing anything.

#[cfg(test)]
pub(crate) mod fake;
pub mod request;
mod tracker;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::artifact::{SectionKind, SiteArtifact};
use crate::config::Config;
use crate::error::{GenerationError, SessionWarning};
use crate::extract::{ExtractionSource, Extractor, extract};
use crate::history::{HistoryRecord, HistorySink};
use crate::preview;
use crate::upstream::{CompletionBackend, CompletionRequest, Transport};

use self::tracker::SectionTracker;

pub use self::request::{
    GenerationRequest, ImageInput, MAX_IMAGE_BYTES, ModificationRequest, sniff_mime,
};

/// Characters of prompt or response text included in content logs.
const LOG_SAMPLE_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Submitting,
    Streaming,
    Finalizing,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Generate,
    Modify,
}

/// Progress notifications for one session, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session_id: u64,
        mode: SessionMode,
        /// Seeded content: placeholders for generations, the current
        /// artifact for modifications.
        artifact: SiteArtifact,
    },
    Update {
        session_id: u64,
        changed: Vec<SectionKind>,
        /// Kinds whose closing fence has arrived.
        complete: Vec<SectionKind>,
        /// Kind of the fence still open at the end of the buffer.
        writing: Option<SectionKind>,
        artifact: SiteArtifact,
        #[serde(skip_serializing_if = "Option::is_none")]
        preview: Option<String>,
    },
    Completed {
        session_id: u64,
        artifact: SiteArtifact,
        source: ExtractionSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<SessionWarning>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        preview: Option<String>,
    },
    Failed {
        session_id: u64,
        kind: String,
        message: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> u64 {
        match self {
            Self::Started { session_id, .. }
            | Self::Update { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Failed { session_id, .. } => *session_id,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Result of a successful session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session_id: u64,
    pub artifact: SiteArtifact,
    pub source: ExtractionSource,
    pub warning: Option<SessionWarning>,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Wall-clock budget per session, upstream request included.
    pub timeout: Duration,
    pub stream_image_requests: bool,
    pub modification_transport: Transport,
    pub log_content: bool,
    /// Attach a rendered preview document to update and completion events.
    pub render_preview: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            stream_image_requests: false,
            modification_transport: Transport::Stream,
            log_content: false,
            render_preview: false,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.stream.timeout(),
            stream_image_requests: config.stream.stream_image_requests,
            log_content: config.logging.log_content,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Current {
    session_id: u64,
    state: SessionState,
    artifact: SiteArtifact,
}

/// Everything a session needs once it has been validated.
struct SessionPlan {
    mode: SessionMode,
    request: CompletionRequest,
    transport: Transport,
    seed: SiteArtifact,
    label: String,
    source_image: Option<String>,
}

pub struct Orchestrator<B: ?Sized = dyn CompletionBackend> {
    backend: Arc<B>,
    history: Option<Arc<dyn HistorySink>>,
    options: OrchestratorOptions,
    current: Mutex<Current>,
}

impl<B: CompletionBackend + ?Sized> Orchestrator<B> {
    pub fn new(backend: Arc<B>, options: OrchestratorOptions) -> Self {
        Self {
            backend,
            history: None,
            options,
            current: Mutex::new(Current {
                session_id: 0,
                state: SessionState::Idle,
                artifact: SiteArtifact::default(),
            }),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Id of the newest session; 0 before the first one.
    pub fn current_session(&self) -> u64 {
        self.lock().session_id
    }

    pub fn current_artifact(&self) -> SiteArtifact {
        self.lock().artifact.clone()
    }

    /// Drop the current artifact and make any in-flight session stale.
    pub fn reset(&self) {
        let mut current = self.lock();
        current.session_id += 1;
        current.state = SessionState::Idle;
        current.artifact = SiteArtifact::default();
        debug!(session_id = current.session_id, "Orchestrator reset");
    }

    /// Fresh generation. Image requests use the single-response transport
    /// unless image streaming is enabled.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        request.validate()?;
        let transport = if request.is_image() && !self.options.stream_image_requests {
            Transport::Single
        } else {
            Transport::Stream
        };
        let plan = SessionPlan {
            mode: SessionMode::Generate,
            request: request.completion_request(),
            transport,
            seed: SiteArtifact::default(),
            label: request.label(),
            source_image: request.source_image(),
        };
        self.run(plan, events).await
    }

    /// Edit of an existing artifact over the configured transport.
    pub async fn modify(
        &self,
        request: ModificationRequest,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        self.modify_with(request, self.options.modification_transport, events)
            .await
    }

    pub async fn modify_with(
        &self,
        request: ModificationRequest,
        transport: Transport,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        request.validate()?;
        let plan = SessionPlan {
            mode: SessionMode::Modify,
            request: request.completion_request(),
            transport,
            seed: request.current.clone(),
            label: request.instruction.trim().to_string(),
            source_image: None,
        };
        self.run(plan, events).await
    }

    /// Route a submission: a text prompt edits the current artifact when it
    /// has content, everything else starts a fresh generation.
    pub async fn submit(
        &self,
        request: GenerationRequest,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        let current = self.current_artifact();
        match request {
            GenerationRequest::Text { prompt } if current.has_content() => {
                self.modify(ModificationRequest::new(current, prompt), events)
                    .await
            }
            request => self.generate(request, events).await,
        }
    }

    // MARK: - Session lifecycle

    async fn run(
        &self,
        plan: SessionPlan,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        let session_id = self.begin(&plan, events);
        info!(
            session_id,
            mode = ?plan.mode,
            transport = ?plan.transport,
            kind = ?plan.request.kind,
            "Session started"
        );
        if self.options.log_content {
            debug!(session_id, prompt = %sample(&plan.label), "Session prompt");
        }

        let deadline = Instant::now() + self.options.timeout;
        let result = match tokio::time::timeout_at(deadline, self.drive(session_id, &plan, events))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    session_id,
                    timeout_secs = self.options.timeout.as_secs(),
                    "Session exceeded its time budget"
                );
                Err(GenerationError::StreamTimeout(self.options.timeout))
            }
        };

        match result {
            Ok(outcome) => {
                self.offer_history(&plan, &outcome).await;
                Ok(outcome)
            }
            Err(GenerationError::Superseded) => {
                debug!(session_id, "Session superseded");
                Err(GenerationError::Superseded)
            }
            Err(err) => self.fail(session_id, err, events),
        }
    }

    fn begin(&self, plan: &SessionPlan, events: &EventSender) -> u64 {
        let mut current = self.lock();
        current.session_id += 1;
        current.state = SessionState::Submitting;
        current.artifact = plan.seed.clone();
        let _ = events.send(SessionEvent::Started {
            session_id: current.session_id,
            mode: plan.mode,
            artifact: plan.seed.clone(),
        });
        current.session_id
    }

    async fn drive(
        &self,
        session_id: u64,
        plan: &SessionPlan,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        let mut tracker = SectionTracker::seeded(&plan.seed);
        let buffer = match plan.transport {
            Transport::Stream => {
                self.consume_stream(session_id, plan, &mut tracker, events)
                    .await?
            }
            Transport::Single => {
                let text = self.backend.complete(&plan.request).await?;
                self.ensure_current(session_id)?;
                text
            }
        };
        self.finalize(session_id, plan.mode, &buffer, tracker, events)
    }

    async fn consume_stream(
        &self,
        session_id: u64,
        plan: &SessionPlan,
        tracker: &mut SectionTracker,
        events: &EventSender,
    ) -> Result<String, GenerationError> {
        let mut stream = self.backend.stream(&plan.request).await?;
        self.transition(session_id, SessionState::Streaming)?;

        let mut buffer = String::new();
        let mut extractor = Extractor::new();
        while let Some(delta) = stream.next().await {
            let text = match delta {
                Ok(text) => text,
                Err(err) if tracker.produced().is_empty() => return Err(err.into()),
                Err(err) => {
                    warn!(session_id, error = %err, "Stream ended early, keeping partial content");
                    break;
                }
            };
            buffer.push_str(&text);

            let extraction = extractor.extract(&buffer);
            let changed = tracker.apply(&extraction);
            if changed.is_empty() {
                self.ensure_current(session_id)?;
                continue;
            }
            self.publish(session_id, changed, extraction.writing, tracker, events)?;
        }

        debug!(session_id, buffer_len = buffer.len(), "Stream drained");
        Ok(buffer)
    }

    fn publish(
        &self,
        session_id: u64,
        changed: Vec<SectionKind>,
        writing: Option<SectionKind>,
        tracker: &SectionTracker,
        events: &EventSender,
    ) -> Result<(), GenerationError> {
        let artifact = tracker.artifact();
        let preview = self.preview_for(&artifact);

        let mut current = self.lock();
        if current.session_id != session_id {
            return Err(GenerationError::Superseded);
        }
        current.artifact = artifact.clone();
        let _ = events.send(SessionEvent::Update {
            session_id,
            changed,
            complete: tracker.completed(),
            writing,
            artifact,
            preview,
        });
        Ok(())
    }

    fn finalize(
        &self,
        session_id: u64,
        mode: SessionMode,
        buffer: &str,
        mut tracker: SectionTracker,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        self.transition(session_id, SessionState::Finalizing)?;

        let extraction = extract(buffer);
        tracker.finalize(&extraction);
        if tracker.produced().is_empty() {
            warn!(session_id, buffer_len = buffer.len(), "No code sections in response");
            if self.options.log_content {
                debug!(session_id, response = %sample(buffer), "Response sample");
            }
            return Err(GenerationError::NoContentExtracted);
        }

        let missing = tracker.missing();
        let warning = (!missing.is_empty()).then(|| match mode {
            SessionMode::Generate => SessionWarning::PartialContent { missing },
            SessionMode::Modify => SessionWarning::Unchanged { unchanged: missing },
        });
        let artifact = tracker.artifact();
        let preview = self.preview_for(&artifact);

        {
            let mut current = self.lock();
            if current.session_id != session_id {
                return Err(GenerationError::Superseded);
            }
            current.state = SessionState::Success;
            current.artifact = artifact.clone();
            let _ = events.send(SessionEvent::Completed {
                session_id,
                artifact: artifact.clone(),
                source: extraction.source,
                message: warning.as_ref().map(SessionWarning::message),
                warning: warning.clone(),
                preview,
            });
        }

        info!(
            session_id,
            source = ?extraction.source,
            html_len = artifact.html.len(),
            css_len = artifact.css.len(),
            js_len = artifact.js.len(),
            partial = warning.is_some(),
            "Session completed"
        );
        Ok(SessionOutcome {
            session_id,
            artifact,
            source: extraction.source,
            warning,
        })
    }

    fn fail(
        &self,
        session_id: u64,
        err: GenerationError,
        events: &EventSender,
    ) -> Result<SessionOutcome, GenerationError> {
        let mut current = self.lock();
        if current.session_id != session_id {
            debug!(session_id, error = %err, "Stale session failed");
            return Err(GenerationError::Superseded);
        }
        current.state = SessionState::Failed;
        warn!(session_id, kind = err.kind(), error = %err, "Session failed");
        let _ = events.send(SessionEvent::Failed {
            session_id,
            kind: err.kind().to_string(),
            message: err.user_message(),
        });
        Err(err)
    }

    async fn offer_history(&self, plan: &SessionPlan, outcome: &SessionOutcome) {
        let Some(history) = &self.history else {
            return;
        };
        if !outcome.artifact.has_content() {
            return;
        }
        history
            .offer(HistoryRecord::new(
                plan.label.clone(),
                outcome.artifact.clone(),
                plan.source_image.clone(),
            ))
            .await;
    }

    // MARK: - Helpers

    fn lock(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_current(&self, session_id: u64) -> Result<(), GenerationError> {
        if self.lock().session_id == session_id {
            Ok(())
        } else {
            Err(GenerationError::Superseded)
        }
    }

    fn transition(&self, session_id: u64, state: SessionState) -> Result<(), GenerationError> {
        let mut current = self.lock();
        if current.session_id != session_id {
            return Err(GenerationError::Superseded);
        }
        current.state = state;
        Ok(())
    }

    fn preview_for(&self, artifact: &SiteArtifact) -> Option<String> {
        self.options
            .render_preview
            .then(|| preview::render_document(artifact))
    }
}

fn sample(text: &str) -> String {
    text.chars().take(LOG_SAMPLE_CHARS).collect()
}

// MARK: - Tests
