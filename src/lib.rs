//! Zensite: AI website generation with live streaming previews.

pub mod api;
pub mod artifact;
pub mod config;
pub mod error;
pub mod extract;
pub mod history;
pub mod normalize;
pub mod preview;
pub mod session;
pub mod stream;
pub mod upstream;

use std::sync::Arc;

use crate::config::Config;
use crate::history::InMemoryHistory;
use crate::session::{Orchestrator, OrchestratorOptions};
use crate::upstream::CompletionBackend;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn CompletionBackend>,
    pub history: Arc<InMemoryHistory>,
}

impl AppState {
    /// A fresh orchestrator for one HTTP session. Sessions from different
    /// clients never supersede each other.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.backend.clone(),
            OrchestratorOptions::from_config(&self.config),
        )
        .with_history(self.history.clone())
    }
}
