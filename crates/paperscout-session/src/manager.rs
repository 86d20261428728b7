//! Multi-session registry and the public session API.
//!
//! Every operation locks its session only long enough to run a state
//! transition. Rounds run on a spawned task with the corpus checked out, so
//! a dropped caller never strands a session in `Searching`, and a panicking
//! round restores the pre-round corpus.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use paperscout_discovery::{
    Corpus, EmbeddingProvider, Filters, IterationKind, IterationRecord, Orchestrator, PaperId,
    RawPaper, RoundRequest,
};
use paperscout_ranker::{RankedPaper, Ranker};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::augment::{AugmentedQuery, QueryAugmenter};
use crate::error::SessionError;
use crate::session::{SearchSession, SessionId, SessionSummary};
use crate::snapshot::SessionSnapshot;

/// Result of a successful `augment`.
#[derive(Debug, Clone, Serialize)]
pub struct AugmentOutcome {
    pub augmented: AugmentedQuery,
    pub iteration: IterationRecord,
}

type SessionHandle = Arc<Mutex<SearchSession>>;

pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    orchestrator: Arc<Orchestrator>,
    augmenter: Arc<QueryAugmenter>,
    ranker: Ranker,
    embedder: Arc<dyn EmbeddingProvider>,
    default_sources: Vec<String>,
}

impl SessionManager {
    /// Searches without an explicit source list use every registered source.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        augmenter: Arc<QueryAugmenter>,
        ranker: Ranker,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let default_sources = orchestrator.sources().names();
        Self {
            sessions: RwLock::new(HashMap::new()),
            orchestrator,
            augmenter,
            ranker,
            embedder,
            default_sources,
        }
    }

    pub fn with_default_sources(mut self, sources: Vec<String>) -> Self {
        self.default_sources = sources;
        self
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    pub fn default_sources(&self) -> &[String] {
        &self.default_sources
    }

    async fn session(&self, id: SessionId) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::UnknownSession(id))
    }

    /// Runs a state transition while the registry read lock is held, so a
    /// concurrent `remove_session` sees either the idle session or the busy
    /// one, never a round started on a session it already dropped.
    async fn begin<T>(
        &self,
        id: SessionId,
        transition: impl FnOnce(&mut SearchSession) -> Result<T, SessionError>,
    ) -> Result<(SessionHandle, T), SessionError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(&id).cloned().ok_or(SessionError::UnknownSession(id))?;
        let ticket = transition(&mut *handle.lock().await)?;
        Ok((handle, ticket))
    }

    pub async fn create_session(&self) -> SessionId {
        let id = Uuid::new_v4();
        let session = SearchSession::new(id, self.embedder.clone());
        self.sessions.write().await.insert(id, Arc::new(Mutex::new(session)));
        info!(session_id = %id, "session created");
        id
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            out.push(h.lock().await.summary());
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.session_id.cmp(&b.session_id)));
        out
    }

    pub async fn summary(&self, id: SessionId) -> Result<SessionSummary, SessionError> {
        Ok(self.session(id).await?.lock().await.summary())
    }

    pub async fn iterations(&self, id: SessionId) -> Result<Vec<IterationRecord>, SessionError> {
        Ok(self.session(id).await?.lock().await.iterations().to_vec())
    }

    /// Tears a session down with its paper set and index. Rejected while a
    /// round is in flight; the check runs under the registry write lock so
    /// no round can start in between.
    pub async fn remove_session(&self, id: SessionId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let handle = sessions.get(&id).cloned().ok_or(SessionError::UnknownSession(id))?;
        if handle.lock().await.state().is_busy() {
            return Err(SessionError::InvalidState("cannot remove a session with a round in flight".into()));
        }
        sessions.remove(&id);
        info!(session_id = %id, "session removed");
        Ok(())
    }

    /// Runs `round` on its own task. On a panic the pre-round `backup` is
    /// handed back instead and no iteration is recorded.
    async fn run_detached<T, F>(&self, session_id: SessionId, backup: Corpus, round: F) -> (Corpus, Option<T>)
    where
        T: Send + 'static,
        F: Future<Output = (Corpus, T)> + Send + 'static,
    {
        match tokio::spawn(round).await {
            Ok((corpus, out)) => (corpus, Some(out)),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "round task failed, restoring pre-round corpus");
                (backup, None)
            }
        }
    }

    fn lost_round() -> SessionError {
        SessionError::InvalidState("the round was aborted; the session is unchanged".into())
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Runs a search round. `sources: None` queries the default sources.
    /// The paper set is kept and grows; a fresh iteration is always appended.
    #[instrument(skip(self, filters, sources), fields(session_id = %id))]
    pub async fn start_search(
        &self,
        id: SessionId,
        query: &str,
        filters: Filters,
        sources: Option<Vec<String>>,
    ) -> Result<IterationRecord, SessionError> {
        let sources = sources.unwrap_or_else(|| self.default_sources.clone());
        let (handle, ticket) = self.begin(id, |s| s.begin_search(query, filters, sources)).await?;

        let backup = ticket.corpus.clone();
        let orchestrator = self.orchestrator.clone();
        let (mut corpus, request) = (ticket.corpus, ticket.request);
        let (corpus, record) = self
            .run_detached(id, backup, async move {
                let record = orchestrator.run_round(&mut corpus, request).await;
                (corpus, record)
            })
            .await;

        handle.lock().await.finish_round(corpus, record.clone());
        record.ok_or_else(Self::lost_round)
    }

    /// Replaces the selection with `selected_ids`, derives a new query from
    /// those papers and runs an augmented round with the session's filters
    /// and last sources.
    #[instrument(skip(self, selected_ids), fields(session_id = %id, selected = selected_ids.len()))]
    pub async fn augment(&self, id: SessionId, selected_ids: &[PaperId]) -> Result<AugmentOutcome, SessionError> {
        let (handle, ticket) = self.begin(id, |s| s.begin_augment(selected_ids)).await?;

        let backup = ticket.corpus.clone();
        let orchestrator = self.orchestrator.clone();
        let augmenter = self.augmenter.clone();
        let anchors: Vec<PaperId> = ticket.selected.iter().map(|p| p.id).collect();
        let sources = ticket.sources.unwrap_or_else(|| self.default_sources.clone());
        let (filters, original_query, selected) = (ticket.filters, ticket.original_query, ticket.selected);
        let mut corpus = ticket.corpus;

        let (corpus, outcome) = self
            .run_detached(id, backup, async move {
                let augmented = augmenter.augment(&original_query, &selected).await;
                let request = RoundRequest::new(augmented.query.clone(), filters, sources, IterationKind::Augmented)
                    .with_anchors(anchors)
                    .with_correlation_id(id);
                let iteration = orchestrator.run_round(&mut corpus, request).await;
                (corpus, AugmentOutcome { augmented, iteration })
            })
            .await;

        handle.lock().await.finish_round(corpus, outcome.as_ref().map(|o| o.iteration.clone()));
        outcome.ok_or_else(Self::lost_round)
    }

    /// Feeds pre-built papers through dedup, validation and indexing.
    #[instrument(skip(self, raws), fields(session_id = %id, n = raws.len()))]
    pub async fn upload(&self, id: SessionId, raws: Vec<RawPaper>) -> Result<IterationRecord, SessionError> {
        let (handle, ticket) = self.begin(id, SearchSession::begin_upload).await?;

        let backup = ticket.corpus.clone();
        let orchestrator = self.orchestrator.clone();
        let (mut corpus, query, anchors) = (ticket.corpus, ticket.query, ticket.anchor_ids);
        let (corpus, record) = self
            .run_detached(id, backup, async move {
                let record = orchestrator
                    .ingest_uploads(&mut corpus, raws, query.as_deref(), &anchors, Some(id))
                    .await;
                (corpus, record)
            })
            .await;

        handle.lock().await.finish_round(corpus, record.clone());
        record.ok_or_else(Self::lost_round)
    }

    /// Current ranking, best first. `n: None` uses the ranker's `top_n`.
    pub async fn get_top_n(&self, id: SessionId, n: Option<usize>) -> Result<Vec<RankedPaper>, SessionError> {
        let handle = self.session(id).await?;
        let session = handle.lock().await;
        let papers = session
            .papers()
            .ok_or_else(|| SessionError::InvalidState("a round is in flight".into()))?;
        Ok(self.ranker.top_n(papers, n))
    }

    pub async fn mark_selected(&self, id: SessionId, ids: &[PaperId]) -> Result<(), SessionError> {
        self.session(id).await?.lock().await.mark_selected(ids)
    }

    pub async fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, SessionError> {
        let handle = self.session(id).await?;
        let session = handle.lock().await;
        SessionSnapshot::capture(&session)
            .ok_or_else(|| SessionError::InvalidState("cannot snapshot while a round is in flight".into()))
    }

    /// Registers a session rebuilt from `snapshot`, replacing an idle session
    /// with the same id.
    pub async fn restore(&self, snapshot: SessionSnapshot) -> Result<SessionId, SessionError> {
        let id = snapshot.session_id;
        let session = snapshot.restore(self.embedder.clone())?;
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&id) {
            if existing.lock().await.state().is_busy() {
                return Err(SessionError::InvalidState("cannot replace a session with a round in flight".into()));
            }
        }
        sessions.insert(id, Arc::new(Mutex::new(session)));
        info!(session_id = %id, "session restored");
        Ok(id)
    }
}
