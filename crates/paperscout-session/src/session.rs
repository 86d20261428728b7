//! One search session and its state machine.
//!
//! ```text
//!   Empty ──start_search──▶ Searching ──▶ Ready ──augment──▶ Augmenting ──▶ Ready
//!                                          ▲  └──start_search──▶ Searching ──┘
//! ```
//!
//! While a round is in flight the session's corpus is checked out to it, so
//! the paper set and index have exactly one writer. Every `begin_*` method
//! validates before touching anything; a rejection changes nothing.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use paperscout_discovery::{
    Corpus, EmbeddingProvider, Filters, IterationKind, IterationRecord, PaperId, PaperRecord,
    PaperSet, RoundRequest,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    Searching,
    Ready,
    Augmenting,
}

impl SessionState {
    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::Searching | SessionState::Augmenting)
    }
}

/// Work checked out of a session for one round.
#[derive(Debug)]
pub struct RoundTicket {
    pub corpus: Corpus,
    pub request: RoundRequest,
}

/// Work checked out for an augmentation: the round request is built once
/// the augmented query is known.
#[derive(Debug)]
pub struct AugmentTicket {
    pub corpus: Corpus,
    pub original_query: String,
    pub selected: Vec<PaperRecord>,
    pub filters: Filters,
    /// `None` when the session never searched.
    pub sources: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct UploadTicket {
    pub corpus: Corpus,
    pub query: Option<String>,
    pub anchor_ids: Vec<PaperId>,
}

/// Lightweight listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub state: SessionState,
    pub original_query: Option<String>,
    pub iterations: usize,
    pub papers: usize,
    pub selected: usize,
    /// `None` while a round is in flight or before any paper is scored.
    pub relevance: Option<RelevanceStats>,
    pub created_at: DateTime<Utc>,
}

/// Relevance figures over the papers that have a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceStats {
    pub scored: usize,
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub mean_confidence: Option<f64>,
}

impl RelevanceStats {
    pub fn from_papers(papers: &PaperSet) -> Option<Self> {
        let scores: Vec<f64> = papers.iter().filter_map(|p| p.relevance_score).collect();
        if scores.is_empty() {
            return None;
        }
        let confidences: Vec<f64> = papers.iter().filter_map(|p| p.relevance_confidence).collect();
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        Some(Self {
            scored: scores.len(),
            mean: mean(&scores),
            max: scores.iter().copied().fold(f64::MIN, f64::max),
            min: scores.iter().copied().fold(f64::MAX, f64::min),
            mean_confidence: (!confidences.is_empty()).then(|| mean(&confidences)),
        })
    }
}

#[derive(Debug)]
pub struct SearchSession {
    id: SessionId,
    state: SessionState,
    original_query: Option<String>,
    filters: Filters,
    /// Sources of the most recent search; `None` before the first one.
    sources: Option<Vec<String>>,
    iterations: Vec<IterationRecord>,
    /// `None` while checked out to a round.
    corpus: Option<Corpus>,
    selected_ids: Vec<PaperId>,
    /// Papers in the set when the current round started.
    papers_before_round: usize,
    created_at: DateTime<Utc>,
}

impl SearchSession {
    pub fn new(id: SessionId, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::from_parts(id, None, Filters::default(), vec![], None, Corpus::new(embedder), vec![])
    }

    pub(crate) fn from_parts(
        id: SessionId,
        original_query: Option<String>,
        filters: Filters,
        iterations: Vec<IterationRecord>,
        sources: Option<Vec<String>>,
        corpus: Corpus,
        selected_ids: Vec<PaperId>,
    ) -> Self {
        let mut session = Self {
            id,
            state: SessionState::Empty,
            original_query,
            filters,
            sources,
            iterations,
            corpus: Some(corpus),
            selected_ids,
            papers_before_round: 0,
            created_at: Utc::now(),
        };
        session.state = session.settled_state();
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn original_query(&self) -> Option<&str> {
        self.original_query.as_deref()
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    /// Sources of the most recent search, reused by augmentation rounds.
    /// An empty list is an explicit choice and differs from `None`.
    pub fn sources(&self) -> Option<&[String]> {
        self.sources.as_deref()
    }

    pub fn iterations(&self) -> &[IterationRecord] {
        &self.iterations
    }

    pub fn selected_ids(&self) -> &[PaperId] {
        &self.selected_ids
    }

    /// `None` while a round is in flight.
    pub fn corpus(&self) -> Option<&Corpus> {
        self.corpus.as_ref()
    }

    pub fn papers(&self) -> Option<&PaperSet> {
        self.corpus.as_ref().map(|c| &c.papers)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            state: self.state,
            original_query: self.original_query.clone(),
            iterations: self.iterations.len(),
            papers: self.papers().map_or(self.papers_before_round, PaperSet::len),
            selected: self.selected_ids.len(),
            relevance: self.papers().and_then(RelevanceStats::from_papers),
            created_at: self.created_at,
        }
    }

    fn settled_state(&self) -> SessionState {
        let has_papers = self.papers().is_some_and(|p| !p.is_empty());
        if self.original_query.is_some() || has_papers {
            SessionState::Ready
        } else {
            SessionState::Empty
        }
    }

    fn ensure_idle(&self, op: &str) -> Result<(), SessionError> {
        if self.state.is_busy() {
            return Err(SessionError::InvalidState(format!("cannot {op}: a round is already in flight")));
        }
        Ok(())
    }

    fn check_out(&mut self, state: SessionState) -> Result<Corpus, SessionError> {
        let corpus = self
            .corpus
            .take()
            .ok_or_else(|| SessionError::InvalidState("session corpus is checked out".into()))?;
        self.papers_before_round = corpus.papers.len();
        self.state = state;
        Ok(corpus)
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    /// `Empty | Ready -> Searching`. The first query becomes the session's
    /// original query; later searches keep it and grow the same paper set.
    pub fn begin_search(&mut self, query: &str, filters: Filters, sources: Vec<String>) -> Result<RoundTicket, SessionError> {
        self.ensure_idle("start a search")?;
        let query = query.trim();
        if query.is_empty() {
            return Err(SessionError::InvalidState("search query is empty".into()));
        }
        filters.validate().map_err(SessionError::InvalidFilters)?;

        let corpus = self.check_out(SessionState::Searching)?;
        if self.original_query.is_none() {
            self.original_query = Some(query.to_string());
        }
        self.filters = filters.clone();
        self.sources = Some(sources.clone());
        let request = RoundRequest::new(query, filters, sources, IterationKind::Initial)
            .with_anchors(self.selected_ids.clone())
            .with_correlation_id(self.id);
        Ok(RoundTicket { corpus, request })
    }

    /// `Ready -> Augmenting`. Requires a non-empty paper set and at least one
    /// selected id, all of them in the set. On success the selection is
    /// replaced by `selected_ids`.
    pub fn begin_augment(&mut self, selected_ids: &[PaperId]) -> Result<AugmentTicket, SessionError> {
        self.ensure_idle("augment")?;
        if self.state != SessionState::Ready {
            return Err(SessionError::InvalidState("cannot augment before a search".into()));
        }
        let papers = self
            .papers()
            .ok_or_else(|| SessionError::InvalidState("session corpus is checked out".into()))?;
        if papers.is_empty() {
            return Err(SessionError::InvalidState("cannot augment an empty paper set".into()));
        }
        let ids = dedup_ids(selected_ids);
        if ids.is_empty() {
            return Err(SessionError::InvalidState("augment needs at least one selected paper".into()));
        }
        if let Some(missing) = ids.iter().find(|id| !papers.contains(id)) {
            return Err(SessionError::InvalidState(format!("paper {missing} is not in this session")));
        }
        let selected: Vec<PaperRecord> = ids.iter().filter_map(|id| papers.get(id)).cloned().collect();
        let original_query = self
            .original_query
            .clone()
            .unwrap_or_else(|| selected.iter().map(|p| p.title.as_str()).collect::<Vec<_>>().join(" "));

        let corpus = self.check_out(SessionState::Augmenting)?;
        self.selected_ids = ids;
        Ok(AugmentTicket {
            corpus,
            original_query,
            selected,
            filters: self.filters.clone(),
            sources: self.sources.clone(),
        })
    }

    /// `Empty | Ready -> Searching` for an upload round.
    pub fn begin_upload(&mut self) -> Result<UploadTicket, SessionError> {
        self.ensure_idle("upload")?;
        let corpus = self.check_out(SessionState::Searching)?;
        Ok(UploadTicket {
            corpus,
            query: self.original_query.clone(),
            anchor_ids: self.selected_ids.clone(),
        })
    }

    /// Returns the corpus after a round and settles the state. `record` is
    /// `None` when the round was lost and `corpus` is the pre-round backup.
    pub fn finish_round(&mut self, corpus: Corpus, record: Option<IterationRecord>) {
        self.corpus = Some(corpus);
        if let Some(record) = record {
            self.iterations.push(record);
        }
        self.state = self.settled_state();
    }

    /// Replaces the selection. Every id must be in the paper set.
    pub fn mark_selected(&mut self, ids: &[PaperId]) -> Result<(), SessionError> {
        self.ensure_idle("change the selection")?;
        let papers = self
            .papers()
            .ok_or_else(|| SessionError::InvalidState("session corpus is checked out".into()))?;
        let ids = dedup_ids(ids);
        if let Some(missing) = ids.iter().find(|id| !papers.contains(id)) {
            return Err(SessionError::InvalidState(format!("paper {missing} is not in this session")));
        }
        self.selected_ids = ids;
        Ok(())
    }
}

/// Drops repeated ids, keeping first occurrences in order.
fn dedup_ids(ids: &[PaperId]) -> Vec<PaperId> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_discovery::{HashingEmbedder, PaperRecord, RawPaper};

    fn session() -> SearchSession {
        SearchSession::new(Uuid::new_v4(), Arc::new(HashingEmbedder::new(32)))
    }

    fn add_paper(corpus: &mut Corpus, title: &str) -> PaperId {
        let raw = RawPaper::new(title);
        let record = PaperRecord::from_raw(raw, "test", title.to_lowercase(), 0);
        let id = record.id;
        corpus.papers.insert(record);
        id
    }

    #[test]
    fn test_search_checks_out_and_settles() {
        let mut s = session();
        assert_eq!(s.state(), SessionState::Empty);
        let mut ticket = s.begin_search("gnn", Filters::default(), vec!["a".into()]).unwrap();
        assert_eq!(s.state(), SessionState::Searching);
        assert!(s.papers().is_none());
        assert_eq!(ticket.request.correlation_id, Some(s.id()));

        let err = s.begin_search("gnn", Filters::default(), vec![]).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));

        add_paper(&mut ticket.corpus, "Graph nets");
        s.finish_round(ticket.corpus, None);
        assert_eq!(s.state(), SessionState::Ready);
        assert_eq!(s.papers().unwrap().len(), 1);
        assert_eq!(s.original_query(), Some("gnn"));
    }

    #[test]
    fn test_second_search_keeps_original_query() {
        let mut s = session();
        let t = s.begin_search("first", Filters::default(), vec![]).unwrap();
        s.finish_round(t.corpus, None);
        let t = s.begin_search("second", Filters::default(), vec![]).unwrap();
        assert_eq!(t.request.query, "second");
        s.finish_round(t.corpus, None);
        assert_eq!(s.original_query(), Some("first"));
    }

    #[test]
    fn test_rejections_leave_state_unchanged() {
        let mut s = session();
        assert!(matches!(s.begin_search("  ", Filters::default(), vec![]), Err(SessionError::InvalidState(_))));
        let bad = Filters { year_from: Some(2020), year_to: Some(2010), ..Default::default() };
        assert!(matches!(s.begin_search("q", bad, vec![]), Err(SessionError::InvalidFilters(_))));
        assert!(matches!(s.begin_augment(&[Uuid::new_v4()]), Err(SessionError::InvalidState(_))));
        assert_eq!(s.state(), SessionState::Empty);
        assert!(s.original_query().is_none());
        assert!(s.papers().is_some());
    }

    #[test]
    fn test_augment_replaces_selection() {
        let mut s = session();
        let mut t = s.begin_search("q", Filters::default(), vec![]).unwrap();
        let a = add_paper(&mut t.corpus, "A");
        let b = add_paper(&mut t.corpus, "B");
        s.finish_round(t.corpus, None);

        s.mark_selected(&[a]).unwrap();
        assert!(s.begin_augment(&[]).is_err());
        assert!(s.begin_augment(&[a, Uuid::new_v4()]).is_err());
        assert_eq!(s.selected_ids(), &[a]);

        let ticket = s.begin_augment(&[b, b]).unwrap();
        assert_eq!(s.state(), SessionState::Augmenting);
        assert_eq!(s.selected_ids(), &[b]);
        assert_eq!(ticket.selected.len(), 1);
        assert_eq!(ticket.original_query, "q");
        assert_eq!(ticket.sources, Some(vec![]));
        assert!(s.mark_selected(&[a]).is_err());
        s.finish_round(ticket.corpus, None);
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn test_upload_from_empty_becomes_ready() {
        let mut s = session();
        let mut t = s.begin_upload().unwrap();
        assert!(t.query.is_none());
        add_paper(&mut t.corpus, "Uploaded");
        s.finish_round(t.corpus, None);
        assert_eq!(s.state(), SessionState::Ready);
        assert!(s.sources().is_none());
    }

    #[test]
    fn test_summary_relevance_stats() {
        let mut s = session();
        let mut t = s.begin_search("q", Filters::default(), vec![]).unwrap();
        let scored = [(0.9, Some(0.8)), (0.3, Some(0.4)), (0.6, None)];
        for (i, (score, confidence)) in scored.into_iter().enumerate() {
            let id = add_paper(&mut t.corpus, &format!("P{i}"));
            let p = t.corpus.papers.get_mut(&id).unwrap();
            p.relevance_score = Some(score);
            p.relevance_confidence = confidence;
        }
        add_paper(&mut t.corpus, "Unscored");
        assert!(s.summary().relevance.is_none());
        s.finish_round(t.corpus, None);

        let stats = s.summary().relevance.unwrap();
        assert_eq!(stats.scored, 3);
        assert!((stats.mean - 0.6).abs() < 1e-9);
        assert_eq!((stats.max, stats.min), (0.9, 0.3));
        assert!((stats.mean_confidence.unwrap() - 0.6).abs() < 1e-9);
        assert!(session().summary().relevance.is_none());
    }
}
