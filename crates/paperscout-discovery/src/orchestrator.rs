//! Discovery round orchestration.
//!
//! One round:
//!   1. Fan out the query to every enabled source (one task each, shared deadline)
//!   2. Join, discarding failed sources and aborting stragglers past the grace period
//!   3. Deduplicate into the corpus in canonical order
//!   4. Validate new papers against the query (bounded concurrency)
//!   5. Embed new papers into the similarity index
//!   6. Recompute similarity for every paper against the round's reference vector
//!   7. Emit progress events via broadcast channel
//!
//! A round never fails as a whole; source, validation and embedding errors
//! only reduce what it produces.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dedup::{DedupEngine, MergeOutcome};
use crate::embedding::{l2_normalize, EmbeddingProvider};
use crate::error::DiscoveryError;
use crate::index::SimilarityIndex;
use crate::models::{
    FailedSource, Filters, IterationKind, IterationRecord, PaperId, PaperSet, RawPaper,
    AUGMENTED_SOURCE, UPLOAD_SOURCE,
};
use crate::sources::{LiteratureSource, SourceOutcome, SourceRegistry};
use crate::validator::RelevanceValidator;

// ── Config ────────────────────────────────────────────────────────────────────

/// Round timing. Sources see `round_timeout` as their deadline; fan-out
/// stops waiting at `round_timeout + abandon_grace` (32 s by default), which
/// is the hard limit on the source phase. Each later validator or embedder
/// call is cut off after `call_timeout`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline handed to every source for one round.
    pub round_timeout: Duration,
    /// Extra time before still-running source tasks are aborted.
    pub abandon_grace: Duration,
    /// Upper bound on a single relevance or embedding call.
    pub call_timeout: Duration,
    pub validation_concurrency: usize,
    pub embedding_concurrency: usize,
    /// Weight of the query embedding when blended with the selection centroid.
    pub query_weight: f32,
}

impl OrchestratorConfig {
    /// Latest moment the source phase can end, relative to its start.
    pub fn source_phase_limit(&self) -> Duration {
        self.round_timeout + self.abandon_grace
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(30),
            abandon_grace: Duration::from_secs(2),
            call_timeout: Duration::from_secs(20),
            validation_concurrency: 4,
            embedding_concurrency: 4,
            query_weight: 0.5,
        }
    }
}

// ── Round state ───────────────────────────────────────────────────────────────

/// Everything a round reads and grows: the paper set and its index.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub papers: PaperSet,
    pub index: SimilarityIndex,
    pub rounds_completed: usize,
}

impl Corpus {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { papers: PaperSet::new(), index: SimilarityIndex::new(embedder), rounds_completed: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct RoundRequest {
    pub query: String,
    pub filters: Filters,
    /// Source names to query; unknown names are recorded as failed.
    pub sources: Vec<String>,
    pub kind: IterationKind,
    /// Papers whose centroid is blended into the similarity reference.
    pub anchor_ids: Vec<PaperId>,
    /// Correlates progress events with a caller-side entity (a session).
    pub correlation_id: Option<Uuid>,
}

impl RoundRequest {
    pub fn new(query: impl Into<String>, filters: Filters, sources: Vec<String>, kind: IterationKind) -> Self {
        Self { query: query.into(), filters, sources, kind, anchor_ids: vec![], correlation_id: None }
    }

    pub fn with_anchors(mut self, ids: Vec<PaperId>) -> Self {
        self.anchor_ids = ids;
        self
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

// ── Progress events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStage {
    Started,
    SourceFinished,
    SourceFailed,
    Deduplicated,
    Validated,
    Indexed,
    Completed,
}

/// Progress event emitted during a round (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct RoundProgress {
    pub round_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub stage: RoundStage,
    pub message: String,
    pub source: Option<String>,
    pub papers_found: usize,
    pub new_papers: usize,
}

struct Emitter<'a> {
    tx: Option<&'a broadcast::Sender<RoundProgress>>,
    round_id: Uuid,
    correlation_id: Option<Uuid>,
}

impl Emitter<'_> {
    fn emit(&self, stage: RoundStage, message: impl Into<String>, source: Option<&str>, papers_found: usize, new_papers: usize) {
        if let Some(tx) = self.tx {
            // No subscribers is fine.
            let _ = tx.send(RoundProgress {
                round_id: self.round_id,
                correlation_id: self.correlation_id,
                stage,
                message: message.into(),
                source: source.map(String::from),
                papers_found,
                new_papers,
            });
        }
    }
}

// ── Fan-out result ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FanOut {
    batches: BTreeMap<String, Vec<RawPaper>>,
    succeeded: Vec<String>,
    failed: Vec<FailedSource>,
}

impl FanOut {
    fn found(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    fn fail(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedSource { name: name.into(), reason: reason.into() });
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Orchestrator {
    sources: SourceRegistry,
    validator: Arc<dyn RelevanceValidator>,
    dedup: DedupEngine,
    config: OrchestratorConfig,
    progress_tx: Option<broadcast::Sender<RoundProgress>>,
}

impl Orchestrator {
    pub fn new(
        sources: SourceRegistry,
        validator: Arc<dyn RelevanceValidator>,
        dedup: DedupEngine,
        config: OrchestratorConfig,
    ) -> Self {
        Self { sources, validator, dedup, config, progress_tx: None }
    }

    pub fn with_progress(mut self, tx: broadcast::Sender<RoundProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn emitter(&self, correlation_id: Option<Uuid>) -> Emitter<'_> {
        Emitter { tx: self.progress_tx.as_ref(), round_id: Uuid::new_v4(), correlation_id }
    }

    /// Runs one search round against `corpus` and returns its record.
    #[instrument(skip(self, corpus, req), fields(query = %req.query, kind = ?req.kind))]
    pub async fn run_round(&self, corpus: &mut Corpus, req: RoundRequest) -> IterationRecord {
        let t0 = Instant::now();
        let emitter = self.emitter(req.correlation_id);
        emitter.emit(RoundStage::Started, format!("Searching: {}", req.query), None, 0, 0);

        let mut known: Vec<(String, Arc<dyn LiteratureSource>)> = Vec::new();
        let mut fan = FanOut::default();
        let requested: BTreeSet<&String> = req.sources.iter().collect();
        for name in requested {
            match self.sources.get(name) {
                Some(source) => known.push((name.clone(), source)),
                None => {
                    warn!(source = %name, "unknown source requested");
                    fan.fail(name.clone(), "unknown source");
                }
            }
        }

        let no_sources = known.is_empty();
        if !no_sources {
            let unknown = std::mem::take(&mut fan.failed);
            fan = self.fan_out(&req.query, &req.filters, known, &emitter).await;
            fan.failed.extend(unknown);
            fan.failed.sort_by(|a, b| a.name.cmp(&b.name));
        }
        let found = fan.found();

        let marker = match req.kind {
            IterationKind::Augmented => Some(AUGMENTED_SOURCE),
            IterationKind::Upload => Some(UPLOAD_SOURCE),
            IterationKind::Initial => None,
        };
        let round = corpus.rounds_completed;
        let merged = self.dedup.merge(&mut corpus.papers, fan.batches, round, marker);
        emitter.emit(
            RoundStage::Deduplicated,
            format!("{found} papers found, {} new", merged.new_ids.len()),
            None,
            found,
            merged.new_ids.len(),
        );

        // With no source to query, the round only re-scores what is there.
        let to_validate = if no_sources { corpus.papers.ids() } else { merged.new_ids.clone() };
        self.score_round(corpus, &to_validate, &req.query, &req.anchor_ids, &emitter).await;

        let mut succeeded = fan.succeeded;
        succeeded.sort();
        let record = self.finish(corpus, &req.query, req.kind, succeeded, fan.failed, merged, t0);
        emitter.emit(
            RoundStage::Completed,
            format!("Round complete: {} new papers", record.new_paper_ids.len()),
            None,
            found,
            record.new_paper_ids.len(),
        );
        record
    }

    /// Feeds user-supplied papers through dedup, validation and indexing.
    /// Without a query, relevance and similarity are left untouched.
    #[instrument(skip(self, corpus, raws, anchor_ids), fields(n = raws.len()))]
    pub async fn ingest_uploads(
        &self,
        corpus: &mut Corpus,
        raws: Vec<RawPaper>,
        query: Option<&str>,
        anchor_ids: &[PaperId],
        correlation_id: Option<Uuid>,
    ) -> IterationRecord {
        let t0 = Instant::now();
        let emitter = self.emitter(correlation_id);
        let found = raws.len();
        emitter.emit(RoundStage::Started, format!("Ingesting {found} uploaded papers"), Some(UPLOAD_SOURCE), found, 0);

        let mut batches = BTreeMap::new();
        batches.insert(UPLOAD_SOURCE.to_string(), raws);
        let round = corpus.rounds_completed;
        let merged = self.dedup.merge(&mut corpus.papers, batches, round, None);
        emitter.emit(RoundStage::Deduplicated, format!("{} new uploaded papers", merged.new_ids.len()), None, found, merged.new_ids.len());

        let query = query.map(str::trim).filter(|q| !q.is_empty());
        match query {
            Some(q) => self.score_round(corpus, &merged.new_ids, q, anchor_ids, &emitter).await,
            None => self.index_pending(corpus, &emitter).await,
        }

        let record = self.finish(corpus, query.unwrap_or(""), IterationKind::Upload, vec![], vec![], merged, t0);
        emitter.emit(RoundStage::Completed, "Upload complete", None, found, record.new_paper_ids.len());
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        corpus: &mut Corpus,
        query: &str,
        kind: IterationKind,
        sources_queried: Vec<String>,
        failed_sources: Vec<FailedSource>,
        merged: MergeOutcome,
        t0: Instant,
    ) -> IterationRecord {
        corpus.rounds_completed += 1;
        let record = IterationRecord {
            query_used: query.to_string(),
            kind,
            sources_queried,
            failed_sources,
            new_paper_ids: merged.new_ids,
            dedup_collisions: merged.collisions,
            timestamp: Utc::now(),
            duration_ms: t0.elapsed().as_millis() as u64,
        };
        info!(
            new = record.new_paper_ids.len(),
            collisions = record.dedup_collisions,
            failed = record.failed_sources.len(),
            total = corpus.papers.len(),
            duration_ms = record.duration_ms,
            "Round finished"
        );
        record
    }

    /// Queries every source concurrently under one deadline.
    async fn fan_out(
        &self,
        query: &str,
        filters: &Filters,
        sources: Vec<(String, Arc<dyn LiteratureSource>)>,
        emitter: &Emitter<'_>,
    ) -> FanOut {
        let started = Instant::now();
        let deadline = started + self.config.round_timeout;
        let hard_stop = started + self.config.source_phase_limit();

        let mut set: JoinSet<SourceOutcome> = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, String> = HashMap::new();
        for (name, source) in sources {
            let (q, f) = (query.to_string(), filters.clone());
            let handle = set.spawn(async move { source.search(&q, &f, deadline).await });
            pending.insert(handle.id(), name);
        }

        let mut fan = FanOut::default();
        loop {
            match timeout_at(hard_stop, set.join_next_with_id()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    let Some(name) = pending.remove(&id) else { continue };
                    self.classify(&mut fan, name, outcome, emitter);
                }
                Ok(Some(Err(join_err))) => {
                    let name = pending.remove(&join_err.id()).unwrap_or_else(|| "unknown".to_string());
                    warn!(source = %name, error = %join_err, "source task panicked");
                    emitter.emit(RoundStage::SourceFailed, "source task panicked", Some(&name), 0, 0);
                    fan.fail(name, "panicked");
                }
                Ok(None) => break,
                Err(_) => {
                    set.abort_all();
                    for (_, name) in pending.drain() {
                        warn!(source = %name, "source abandoned past the round deadline");
                        emitter.emit(RoundStage::SourceFailed, "timeout", Some(&name), 0, 0);
                        fan.fail(name, "timeout");
                    }
                    break;
                }
            }
        }
        fan
    }

    fn classify(&self, fan: &mut FanOut, name: String, outcome: SourceOutcome, emitter: &Emitter<'_>) {
        let n = outcome.papers.len();
        match outcome.error {
            Some(e) => {
                warn!(source = %name, error = %e, discarded = n, "source failed");
                emitter.emit(RoundStage::SourceFailed, e.to_string(), Some(&name), n, 0);
                fan.fail(name, e.reason());
            }
            None if outcome.timed_out && n == 0 => {
                warn!(source = %name, "source timed out with no results");
                emitter.emit(RoundStage::SourceFailed, "timeout", Some(&name), 0, 0);
                fan.fail(name, "timeout");
            }
            None => {
                if outcome.timed_out {
                    info!(source = %name, n, "source timed out, keeping partial results");
                } else {
                    debug!(source = %name, n, "source finished");
                }
                emitter.emit(RoundStage::SourceFinished, format!("{n} papers"), Some(&name), n, 0);
                fan.succeeded.push(name.clone());
                fan.batches.insert(name, outcome.papers);
            }
        }
    }

    async fn score_round(
        &self,
        corpus: &mut Corpus,
        to_validate: &[PaperId],
        query: &str,
        anchor_ids: &[PaperId],
        emitter: &Emitter<'_>,
    ) {
        if !query.trim().is_empty() && !to_validate.is_empty() {
            let failed = self.validate(corpus, to_validate, query).await;
            emitter.emit(
                RoundStage::Validated,
                format!("{} papers validated, {failed} failed", to_validate.len()),
                None,
                to_validate.len(),
                0,
            );
        }
        self.index_pending(corpus, emitter).await;
        self.rescore_similarity(corpus, query, anchor_ids).await;
    }

    /// Validates `ids` with bounded concurrency, each call capped at
    /// `call_timeout`. A failure leaves the paper's previous relevance in
    /// place. Returns the failure count.
    async fn validate(&self, corpus: &mut Corpus, ids: &[PaperId], query: &str) -> usize {
        let papers: Vec<_> = ids.iter().filter_map(|id| corpus.papers.get(id).cloned()).collect();
        let results: Vec<_> = stream::iter(papers)
            .map(|paper| {
                let validator = self.validator.clone();
                let query = query.to_string();
                let limit = self.config.call_timeout;
                async move {
                    let res = match timeout(limit, validator.validate(&paper, &query)).await {
                        Ok(res) => res,
                        Err(_) => Err(DiscoveryError::ValidationFailed(format!(
                            "timed out after {}ms",
                            limit.as_millis()
                        ))),
                    };
                    (paper.id, res)
                }
            })
            .buffer_unordered(self.config.validation_concurrency.max(1))
            .collect()
            .await;

        let mut failed = 0;
        for (id, res) in results {
            match res {
                Ok(a) => {
                    if let Some(p) = corpus.papers.get_mut(&id) {
                        p.relevance_score = Some(a.score.clamp(0.0, 1.0));
                        p.relevance_confidence = Some(a.confidence.clamp(0.0, 1.0));
                    }
                }
                Err(e) => {
                    debug!(paper_id = %id, error = %e, "validation failed, relevance unchanged");
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Embeds every paper not yet in the index, including earlier failures.
    async fn index_pending(&self, corpus: &mut Corpus, emitter: &Emitter<'_>) {
        let items: Vec<(PaperId, String)> = corpus
            .papers
            .iter()
            .filter(|p| !corpus.index.contains(&p.id))
            .map(|p| (p.id, p.embedding_text()))
            .collect();
        if items.is_empty() {
            return;
        }
        let attempted = items.len();
        let failed = corpus
            .index
            .insert_many(items, self.config.embedding_concurrency, self.config.call_timeout)
            .await;
        emitter.emit(
            RoundStage::Indexed,
            format!("{} papers indexed, {} failed", attempted - failed.len(), failed.len()),
            None,
            attempted,
            0,
        );
    }

    /// Reference = query embedding blended with the anchor centroid. If
    /// neither is available the previous similarity scores are kept.
    async fn reference_vector(&self, index: &SimilarityIndex, query: &str, anchor_ids: &[PaperId]) -> Option<Vec<f32>> {
        let query_vec = if query.trim().is_empty() {
            None
        } else {
            match timeout(self.config.call_timeout, index.embed_query(query)).await {
                Ok(Ok(v)) => Some(v),
                Ok(Err(e)) => {
                    warn!(error = %e, "query embedding failed");
                    None
                }
                Err(_) => {
                    warn!(timeout_ms = self.config.call_timeout.as_millis() as u64, "query embedding timed out");
                    None
                }
            }
        };
        let centroid = index.centroid(anchor_ids);

        let mut reference = match (query_vec, centroid) {
            (Some(q), Some(c)) if q.len() == c.len() => {
                let w = self.config.query_weight.clamp(0.0, 1.0);
                let mut q = q;
                let mut c = c;
                l2_normalize(&mut q);
                l2_normalize(&mut c);
                q.iter().zip(&c).map(|(a, b)| w * a + (1.0 - w) * b).collect()
            }
            (Some(q), _) => q,
            (None, Some(c)) => c,
            (None, None) => return None,
        };
        l2_normalize(&mut reference);
        Some(reference)
    }

    async fn rescore_similarity(&self, corpus: &mut Corpus, query: &str, anchor_ids: &[PaperId]) {
        let Some(reference) = self.reference_vector(&corpus.index, query, anchor_ids).await else {
            debug!("no reference vector, similarity scores unchanged");
            return;
        };
        let scores = corpus.index.score(&reference);
        for paper in corpus.papers.iter_mut() {
            if let Some(s) = scores.get(&paper.id) {
                paper.similarity_score = Some(*s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::error::{DiscoveryError, SourceError};
    use crate::models::PaperRecord;
    use crate::validator::{HeuristicValidator, RelevanceAssessment};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Fixed {
        name: &'static str,
        papers: Vec<RawPaper>,
        delay: Duration,
        error: Option<SourceError>,
    }

    #[async_trait]
    impl LiteratureSource for Fixed {
        fn name(&self) -> &str { self.name }
        async fn search(&self, _q: &str, _f: &Filters, deadline: Instant) -> SourceOutcome {
            if tokio::time::timeout_at(deadline, tokio::time::sleep(self.delay)).await.is_err() {
                return SourceOutcome { timed_out: true, ..Default::default() };
            }
            SourceOutcome { papers: self.papers.clone(), error: self.error.clone(), timed_out: false }
        }
    }

    /// Ignores the deadline entirely.
    struct Stuck;

    #[async_trait]
    impl LiteratureSource for Stuck {
        fn name(&self) -> &str { "stuck" }
        async fn search(&self, _q: &str, _f: &Filters, _d: Instant) -> SourceOutcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            SourceOutcome::ok(vec![RawPaper::new("never")])
        }
    }

    struct Failing;

    #[async_trait]
    impl RelevanceValidator for Failing {
        async fn validate(&self, _p: &PaperRecord, _q: &str) -> Result<RelevanceAssessment, DiscoveryError> {
            Err(DiscoveryError::ValidationFailed("down".into()))
        }
    }

    /// Never answers.
    struct Hung;

    #[async_trait]
    impl RelevanceValidator for Hung {
        async fn validate(&self, _p: &PaperRecord, _q: &str) -> Result<RelevanceAssessment, DiscoveryError> {
            std::future::pending::<Result<RelevanceAssessment, DiscoveryError>>().await
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Hung {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, DiscoveryError> {
            std::future::pending::<Result<Vec<f32>, DiscoveryError>>().await
        }
        fn model_id(&self) -> &str { "hung" }
    }

    fn raw(title: &str, doi: Option<&str>) -> RawPaper {
        RawPaper { title: title.into(), doi: doi.map(String::from), year: Some(2020), ..Default::default() }
    }

    fn fixed(name: &'static str, papers: Vec<RawPaper>, delay_ms: u64) -> Arc<dyn LiteratureSource> {
        Arc::new(Fixed { name, papers, delay: Duration::from_millis(delay_ms), error: None })
    }

    fn orchestrator(sources: Vec<Arc<dyn LiteratureSource>>, validator: Arc<dyn RelevanceValidator>) -> Orchestrator {
        let mut reg = SourceRegistry::new();
        for s in sources {
            reg.register(s);
        }
        Orchestrator::new(reg, validator, DedupEngine::default(), OrchestratorConfig::default())
    }

    fn corpus() -> Corpus {
        Corpus::new(Arc::new(HashingEmbedder::new(64)))
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_same_doi_across_sources_collapses() {
        let orch = orchestrator(
            vec![
                fixed("a", vec![raw("Paper A", Some("10.1/abc"))], 0),
                fixed("b", vec![raw("Paper A", Some("10.1/ABC"))], 0),
            ],
            Arc::new(HeuristicValidator),
        );
        let mut c = corpus();
        let rec = orch
            .run_round(&mut c, RoundRequest::new("paper", Filters::default(), names(&["a", "b"]), IterationKind::Initial))
            .await;
        assert_eq!(c.papers.len(), 1);
        assert_eq!(rec.dedup_collisions, 1);
        assert_eq!(rec.sources_queried, names(&["a", "b"]));
        let p = c.papers.iter().next().unwrap();
        assert!(p.relevance_score.is_some());
        assert!(p.similarity_score.is_some());
        assert!(c.index.contains(&p.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_and_stuck_sources_are_isolated() {
        let failing = Arc::new(Fixed {
            name: "broken",
            papers: vec![raw("Partial", None)],
            delay: Duration::ZERO,
            error: Some(SourceError::Status { status: 503, body: "down".into() }),
        });
        let orch = orchestrator(
            vec![failing, Arc::new(Stuck), fixed("good", vec![raw("Good paper", None)], 10)],
            Arc::new(HeuristicValidator),
        );
        let mut c = corpus();
        let start = Instant::now();
        let rec = orch
            .run_round(
                &mut c,
                RoundRequest::new("good", Filters::default(), names(&["broken", "good", "stuck", "missing"]), IterationKind::Initial),
            )
            .await;
        let cfg = OrchestratorConfig::default();
        assert!(start.elapsed() <= cfg.source_phase_limit() + Duration::from_millis(50));
        assert_eq!(rec.sources_queried, names(&["good"]));
        let failed: Vec<_> = rec.failed_sources.iter().map(|f| (f.name.as_str(), f.reason.as_str())).collect();
        assert_eq!(failed, vec![("broken", "HTTP 503: down"), ("missing", "unknown source"), ("stuck", "timeout")]);
        let titles: Vec<_> = c.papers.iter().map(|p| p.title.clone()).collect();
        assert_eq!(titles, vec!["Good paper".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_order_does_not_change_result() {
        let run = |delay_a: u64, delay_b: u64| async move {
            let orch = orchestrator(
                vec![
                    fixed("a", vec![raw("Shared title", None), raw("Only in A", None)], delay_a),
                    fixed("b", vec![RawPaper { citation_count: 9, ..raw("Shared title", Some("10.2/x")) }], delay_b),
                ],
                Arc::new(HeuristicValidator),
            );
            let mut c = corpus();
            orch.run_round(&mut c, RoundRequest::new("shared", Filters::default(), names(&["a", "b"]), IterationKind::Initial))
                .await;
            c.papers
                .iter()
                .map(|p| (p.title.clone(), p.doi.clone(), p.citation_count, p.sources.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(10, 500).await, run(500, 10).await);
    }

    #[tokio::test]
    async fn test_zero_sources_rescores_without_new_papers() {
        let orch = orchestrator(vec![fixed("a", vec![raw("Protein folding", None), raw("Galaxy surveys", None)], 0)], Arc::new(HeuristicValidator));
        let mut c = corpus();
        orch.run_round(&mut c, RoundRequest::new("protein folding", Filters::default(), names(&["a"]), IterationKind::Initial))
            .await;
        let rec = orch
            .run_round(&mut c, RoundRequest::new("galaxy surveys", Filters::default(), vec![], IterationKind::Initial))
            .await;
        assert!(rec.new_paper_ids.is_empty());
        assert!(rec.sources_queried.is_empty());
        let galaxy = c.papers.iter().find(|p| p.title == "Galaxy surveys").unwrap();
        assert!(galaxy.relevance_score.unwrap() > 0.5);
        assert_eq!(c.rounds_completed, 2);
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_relevance_unscored() {
        let orch = orchestrator(vec![fixed("a", vec![raw("Anything", None)], 0)], Arc::new(Failing));
        let mut c = corpus();
        orch.run_round(&mut c, RoundRequest::new("q", Filters::default(), names(&["a"]), IterationKind::Initial))
            .await;
        let p = c.papers.iter().next().unwrap();
        assert_eq!(p.relevance_score, None);
        assert!(p.similarity_score.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_validator_cannot_stall_the_round() {
        let orch = orchestrator(vec![fixed("a", vec![raw("Only paper", None)], 0)], Arc::new(Hung));
        let mut c = corpus();
        let start = Instant::now();
        let rec = orch
            .run_round(&mut c, RoundRequest::new("only", Filters::default(), names(&["a"]), IterationKind::Initial))
            .await;
        let cfg = OrchestratorConfig::default();
        assert!(start.elapsed() <= cfg.call_timeout + Duration::from_millis(50));
        assert_eq!(rec.new_paper_ids.len(), 1);
        let p = c.papers.get(&rec.new_paper_ids[0]).unwrap();
        assert_eq!(p.relevance_score, None);
        assert!(p.similarity_score.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_embedder_leaves_papers_unindexed() {
        let orch = orchestrator(vec![fixed("a", vec![raw("Only paper", None)], 0)], Arc::new(HeuristicValidator));
        let mut c = Corpus::new(Arc::new(Hung));
        let start = Instant::now();
        let rec = orch
            .run_round(&mut c, RoundRequest::new("only", Filters::default(), names(&["a"]), IterationKind::Initial))
            .await;
        let cfg = OrchestratorConfig::default();
        // One bounded call for the batch, one for the query vector.
        assert!(start.elapsed() <= cfg.call_timeout * 2 + Duration::from_millis(50));
        let p = c.papers.get(&rec.new_paper_ids[0]).unwrap();
        assert!(p.relevance_score.is_some());
        assert_eq!(p.similarity_score, None);
        assert!(c.index.is_empty());
    }

    #[tokio::test]
    async fn test_augmented_round_marks_provenance_and_emits_progress() {
        let (tx, mut rx) = broadcast::channel(64);
        let orch = orchestrator(vec![fixed("a", vec![raw("Fresh", None)], 0)], Arc::new(HeuristicValidator)).with_progress(tx);
        let mut c = corpus();
        let rec = orch
            .run_round(&mut c, RoundRequest::new("fresh", Filters::default(), names(&["a"]), IterationKind::Augmented))
            .await;
        let p = c.papers.get(&rec.new_paper_ids[0]).unwrap();
        assert_eq!(p.sources, names(&["augmented", "a"]));

        let mut stages = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            stages.push(ev.stage);
        }
        assert_eq!(stages.first(), Some(&RoundStage::Started));
        assert_eq!(stages.last(), Some(&RoundStage::Completed));
        assert!(stages.contains(&RoundStage::SourceFinished));
    }

    #[tokio::test]
    async fn test_uploads_without_query_skip_scoring() {
        let orch = orchestrator(vec![], Arc::new(HeuristicValidator));
        let mut c = corpus();
        let rec = orch.ingest_uploads(&mut c, vec![raw("My own PDF", None)], None, &[], None).await;
        assert_eq!(rec.kind, IterationKind::Upload);
        let p = c.papers.get(&rec.new_paper_ids[0]).unwrap();
        assert_eq!(p.source_name(), UPLOAD_SOURCE);
        assert_eq!(p.relevance_score, None);
        assert_eq!(p.similarity_score, None);
        assert!(c.index.contains(&p.id));
    }
}
