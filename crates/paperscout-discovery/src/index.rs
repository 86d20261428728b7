//! In-memory similarity index over paper embeddings.
//!
//! Entries are append-only: a paper is embedded once, on first successful
//! insert, and its vector never changes afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::DiscoveryError;
use crate::models::PaperId;

/// Texts sent per `embed_batch` call by `insert_many`.
pub const EMBED_BATCH_SIZE: usize = 16;

type Embedded = (PaperId, Result<Vec<f32>, DiscoveryError>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub paper_id: PaperId,
    pub vector: Vec<f32>,
}

#[derive(Clone)]
pub struct SimilarityIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: Vec<IndexEntry>,
    positions: HashMap<PaperId, usize>,
}

impl SimilarityIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, entries: Vec::new(), positions: HashMap::new() }
    }

    /// Rebuilds an index from previously exported entries.
    pub fn from_entries(embedder: Arc<dyn EmbeddingProvider>, entries: Vec<IndexEntry>) -> Self {
        let mut index = Self::new(embedder);
        for e in entries {
            index.insert_vector(e.paper_id, e.vector);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &PaperId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn vector(&self, id: &PaperId) -> Option<&[f32]> {
        self.positions.get(id).map(|&i| self.entries[i].vector.as_slice())
    }

    /// Embeds `text` and stores it under `id`. An existing entry is kept
    /// untouched and nothing is embedded.
    pub async fn insert(&mut self, id: PaperId, text: &str) -> Result<(), DiscoveryError> {
        if self.contains(&id) {
            return Ok(());
        }
        let v = self.embedder.embed(text).await?;
        self.insert_vector(id, v);
        Ok(())
    }

    /// Stores a precomputed vector. Returns false if `id` was already present.
    pub fn insert_vector(&mut self, id: PaperId, vector: Vec<f32>) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.positions.insert(id, self.entries.len());
        self.entries.push(IndexEntry { paper_id: id, vector });
        true
    }

    /// Embeds many papers in batches of [`EMBED_BATCH_SIZE`], running up to
    /// `concurrency` batches at once. Every provider call is bounded by
    /// `call_timeout`. Returns the ids that failed to embed; they stay
    /// unindexed.
    pub async fn insert_many(
        &mut self,
        items: Vec<(PaperId, String)>,
        concurrency: usize,
        call_timeout: Duration,
    ) -> Vec<PaperId> {
        let pending: Vec<_> = items.into_iter().filter(|(id, _)| !self.contains(id)).collect();
        if pending.is_empty() {
            return vec![];
        }
        let embedder = self.embedder.clone();
        let chunks: Vec<Vec<(PaperId, String)>> = pending.chunks(EMBED_BATCH_SIZE).map(<[_]>::to_vec).collect();
        let mut results: Vec<(usize, Vec<Embedded>)> = stream::iter(chunks.into_iter().enumerate())
            .map(|(i, chunk)| {
                let embedder = embedder.clone();
                async move { (i, embed_chunk(embedder.as_ref(), chunk, call_timeout).await) }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        // Keep insertion order stable regardless of completion order.
        results.sort_by_key(|(i, _)| *i);

        let mut failed = Vec::new();
        for (id, res) in results.into_iter().flat_map(|(_, chunk)| chunk) {
            match res {
                Ok(v) => {
                    self.insert_vector(id, v);
                }
                Err(e) => {
                    warn!(paper_id = %id, error = %e, "embedding failed, paper left unindexed");
                    failed.push(id);
                }
            }
        }
        debug!(indexed = self.len(), failed = failed.len(), "index updated");
        failed
    }

    /// Embeds a query text to use as a reference vector.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, DiscoveryError> {
        self.embedder.embed(text).await
    }

    /// Cosine similarity of every stored vector against `reference`.
    pub fn score(&self, reference: &[f32]) -> HashMap<PaperId, f64> {
        self.entries
            .iter()
            .map(|e| (e.paper_id, cosine_similarity(reference, &e.vector)))
            .collect()
    }

    /// Mean of the stored vectors for `ids`; ids without a vector are
    /// skipped. `None` if no id has a vector or dimensions disagree.
    pub fn centroid(&self, ids: &[PaperId]) -> Option<Vec<f32>> {
        let vectors: Vec<&[f32]> = ids.iter().filter_map(|id| self.vector(id)).collect();
        let dim = vectors.first()?.len();
        if vectors.iter().any(|v| v.len() != dim) {
            return None;
        }
        let mut mean = vec![0f32; dim];
        for v in &vectors {
            for (m, x) in mean.iter_mut().zip(v.iter()) {
                *m += x;
            }
        }
        let n = vectors.len() as f32;
        mean.iter_mut().for_each(|m| *m /= n);
        Some(mean)
    }
}

fn timed_out(after: Duration) -> DiscoveryError {
    DiscoveryError::EmbeddingFailed(format!("timed out after {}ms", after.as_millis()))
}

/// Embeds one chunk with a single batch call. When the batch errors, each
/// text is retried alone so one bad input only costs its own paper. A timed
/// out batch fails the whole chunk.
async fn embed_chunk(
    embedder: &dyn EmbeddingProvider,
    chunk: Vec<(PaperId, String)>,
    call_timeout: Duration,
) -> Vec<Embedded> {
    let texts: Vec<String> = chunk.iter().map(|(_, t)| t.clone()).collect();
    let err = match timeout(call_timeout, embedder.embed_batch(&texts)).await {
        Ok(Ok(vectors)) if vectors.len() == chunk.len() => {
            return chunk.into_iter().map(|(id, _)| id).zip(vectors.into_iter().map(Ok)).collect();
        }
        Ok(Ok(vectors)) => DiscoveryError::EmbeddingFailed(format!(
            "expected {} vectors, got {}",
            chunk.len(),
            vectors.len()
        )),
        Ok(Err(e)) => e,
        Err(_) => return chunk.into_iter().map(|(id, _)| (id, Err(timed_out(call_timeout)))).collect(),
    };
    if chunk.len() == 1 {
        return chunk.into_iter().map(|(id, _)| (id, Err(err.clone()))).collect();
    }
    debug!(error = %err, n = chunk.len(), "batch embedding failed, retrying one by one");
    join_all(chunk.into_iter().map(|(id, text)| async move {
        let res = match timeout(call_timeout, embedder.embed(&text)).await {
            Ok(res) => res,
            Err(_) => Err(timed_out(call_timeout)),
        };
        (id, res)
    }))
    .await
}

impl std::fmt::Debug for SimilarityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityIndex")
            .field("model", &self.embedder.model_id())
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use async_trait::async_trait;
    use uuid::Uuid;

    const CALL_TIMEOUT: Duration = Duration::from_secs(5);

    struct FailOn(&'static str);

    #[async_trait]
    impl EmbeddingProvider for FailOn {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, DiscoveryError> {
            if text == self.0 {
                Err(DiscoveryError::EmbeddingFailed("scripted".into()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
        fn model_id(&self) -> &str { "fail-on" }
    }

    fn hashing() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingEmbedder::new(128))
    }

    #[tokio::test]
    async fn test_insert_never_overwrites() {
        let mut idx = SimilarityIndex::new(hashing());
        let id = Uuid::new_v4();
        idx.insert(id, "protein folding").await.unwrap();
        let before = idx.vector(&id).unwrap().to_vec();
        idx.insert(id, "something else entirely").await.unwrap();
        assert_eq!(idx.vector(&id).unwrap(), before.as_slice());
        assert_eq!(idx.len(), 1);
    }

    #[tokio::test]
    async fn test_score_ranks_related_text_higher() {
        let mut idx = SimilarityIndex::new(hashing());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        idx.insert(a, "protein structure prediction with deep learning").await.unwrap();
        idx.insert(b, "renaissance painting techniques").await.unwrap();
        let q = idx.embed_query("deep learning protein structure").await.unwrap();
        let scores = idx.score(&q);
        assert!(scores[&a] > scores[&b]);
    }

    #[tokio::test]
    async fn test_insert_many_reports_failures() {
        let mut idx = SimilarityIndex::new(Arc::new(FailOn("bad")));
        let ids: Vec<_> = (0..3).map(|_| Uuid::new_v4()).collect();
        let failed = idx
            .insert_many(
                vec![(ids[0], "ok".into()), (ids[1], "bad".into()), (ids[2], "ok too".into())],
                2,
                CALL_TIMEOUT,
            )
            .await;
        assert_eq!(failed, vec![ids[1]]);
        assert!(idx.contains(&ids[0]) && idx.contains(&ids[2]));
        assert_eq!(idx.entries()[0].paper_id, ids[0]);
    }

    /// Counts batch calls; answers every text with a fixed vector.
    #[derive(Default)]
    struct Batching {
        batches: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for Batching {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, DiscoveryError> {
            Ok(vec![1.0, 0.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DiscoveryError> {
            self.batches.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![vec![0.0, 1.0]; texts.len()])
        }
        fn model_id(&self) -> &str { "batching" }
    }

    struct Stalled;

    #[async_trait]
    impl EmbeddingProvider for Stalled {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, DiscoveryError> {
            std::future::pending::<Result<Vec<f32>, DiscoveryError>>().await
        }
        fn model_id(&self) -> &str { "stalled" }
    }

    #[tokio::test]
    async fn test_insert_many_embeds_in_batches() {
        let embedder = Arc::new(Batching::default());
        let mut idx = SimilarityIndex::new(embedder.clone());
        let items: Vec<_> = (0..EMBED_BATCH_SIZE + 1).map(|i| (Uuid::new_v4(), format!("paper {i}"))).collect();
        let first = items[0].0;
        let failed = idx.insert_many(items, 4, CALL_TIMEOUT).await;
        assert!(failed.is_empty());
        assert_eq!(idx.len(), EMBED_BATCH_SIZE + 1);
        assert_eq!(embedder.batches.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(idx.entries()[0].paper_id, first);
        assert_eq!(idx.vector(&first), Some(&[0.0f32, 1.0][..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_embedder_times_out() {
        let mut idx = SimilarityIndex::new(Arc::new(Stalled));
        let ids: Vec<_> = (0..3).map(|_| Uuid::new_v4()).collect();
        let items = ids.iter().map(|id| (*id, "text".to_string())).collect();
        let start = tokio::time::Instant::now();
        let failed = idx.insert_many(items, 2, CALL_TIMEOUT).await;
        assert_eq!(failed, ids);
        assert!(idx.is_empty());
        assert!(start.elapsed() <= CALL_TIMEOUT + Duration::from_millis(10));
    }

    #[test]
    fn test_centroid_and_mismatched_dims() {
        let mut idx = SimilarityIndex::new(hashing());
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        idx.insert_vector(a, vec![1.0, 0.0]);
        idx.insert_vector(b, vec![0.0, 1.0]);
        assert_eq!(idx.centroid(&[a, b]), Some(vec![0.5, 0.5]));
        assert_eq!(idx.centroid(&[Uuid::new_v4()]), None);
        idx.insert_vector(c, vec![1.0, 0.0, 0.0]);
        assert_eq!(idx.centroid(&[a, c]), None);
        assert_eq!(idx.score(&[1.0, 0.0])[&c], 0.0);
    }
}
