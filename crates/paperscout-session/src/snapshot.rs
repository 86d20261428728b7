//! Serializable session snapshots.
//!
//! A snapshot carries everything needed to resume a session: papers in
//! insertion order, iteration history, selection and the stored embedding
//! vectors, so a restored session never re-embeds known papers.

use std::sync::Arc;

use paperscout_discovery::{
    Corpus, EmbeddingProvider, Filters, IndexEntry, IterationRecord, PaperId, PaperRecord,
    PaperSet, SimilarityIndex,
};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::session::{SearchSession, SessionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub original_query: Option<String>,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,
    #[serde(default)]
    pub paper_set: Vec<PaperRecord>,
    #[serde(default)]
    pub selected_ids: Vec<PaperId>,
    #[serde(default)]
    pub index_entries: Vec<IndexEntry>,
}

impl SessionSnapshot {
    /// `None` while a round is in flight.
    pub fn capture(session: &SearchSession) -> Option<Self> {
        let corpus = session.corpus()?;
        Some(Self {
            session_id: session.id(),
            original_query: session.original_query().map(String::from),
            filters: session.filters().clone(),
            sources: session.sources().map(<[String]>::to_vec),
            iterations: session.iterations().to_vec(),
            paper_set: corpus.papers.iter().cloned().collect(),
            selected_ids: session.selected_ids().to_vec(),
            index_entries: corpus.index.entries().to_vec(),
        })
    }

    /// Rebuilds a `Ready` session (or `Empty`, for a snapshot taken before
    /// any search). Selected ids and index entries must refer to papers in
    /// the snapshot.
    pub fn restore(self, embedder: Arc<dyn EmbeddingProvider>) -> Result<SearchSession, SessionError> {
        self.filters.validate().map_err(SessionError::InvalidFilters)?;
        let papers = PaperSet::from(self.paper_set);
        if let Some(id) = self.selected_ids.iter().find(|id| !papers.contains(id)) {
            return Err(SessionError::InvalidState(format!("selected paper {id} is not in the snapshot")));
        }
        if let Some(e) = self.index_entries.iter().find(|e| !papers.contains(&e.paper_id)) {
            return Err(SessionError::InvalidState(format!("index entry {} has no paper", e.paper_id)));
        }
        let corpus = Corpus {
            papers,
            index: SimilarityIndex::from_entries(embedder, self.index_entries),
            rounds_completed: self.iterations.len(),
        };
        Ok(SearchSession::from_parts(
            self.session_id,
            self.original_query,
            self.filters,
            self.iterations,
            self.sources,
            corpus,
            self.selected_ids,
        ))
    }
}
