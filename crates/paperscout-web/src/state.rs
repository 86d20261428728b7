//! Shared application state for the web server.

use std::sync::Arc;

use paperscout_discovery::RoundProgress;
use paperscout_session::SessionManager;
use tokio::sync::broadcast;

/// Shared state injected into every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    /// Round progress, fed by the orchestrator and relayed over SSE.
    pub progress_tx: broadcast::Sender<RoundProgress>,
}

impl AppState {
    /// `progress_tx` must be the sender the orchestrator was built with.
    pub fn new(sessions: Arc<SessionManager>, progress_tx: broadcast::Sender<RoundProgress>) -> Self {
        Self { sessions, progress_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundProgress> {
        self.progress_tx.subscribe()
    }
}

pub type SharedState = Arc<AppState>;
