//! Embedding providers for the similarity index.
//!
//! Backends:
//!   - `LlmEmbedder`      (any `LlmBackend` with an embeddings endpoint)
//!   - `HashingEmbedder`  (offline feature hashing, deterministic)
//!
//! `CachedEmbedder` wraps either with an LRU cache keyed by the input text.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use paperscout_llm::LlmBackend;
use tracing::{debug, instrument};

use crate::dedup::fnv64;
use crate::error::DiscoveryError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DiscoveryError>;

    /// Embeds several texts; the default calls `embed` for each in turn.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DiscoveryError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }

    fn model_id(&self) -> &str;
}

// ── LLM backend ───────────────────────────────────────────────────────────────

pub struct LlmEmbedder {
    backend: Arc<dyn LlmBackend>,
}

impl LlmEmbedder {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl EmbeddingProvider for LlmEmbedder {
    #[instrument(skip(self, text), fields(model = self.backend.model_id(), chars = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DiscoveryError> {
        let mut vectors = self
            .backend
            .embed(vec![text.to_string()])
            .await
            .map_err(|e| DiscoveryError::EmbeddingFailed(e.to_string()))?;
        match vectors.pop() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(DiscoveryError::EmbeddingFailed("backend returned no vector".to_string())),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DiscoveryError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let vectors = self
            .backend
            .embed(texts.to_vec())
            .await
            .map_err(|e| DiscoveryError::EmbeddingFailed(e.to_string()))?;
        if vectors.len() != texts.len() {
            return Err(DiscoveryError::EmbeddingFailed(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn model_id(&self) -> &str {
        self.backend.model_id()
    }
}

// ── Feature hashing ───────────────────────────────────────────────────────────

/// Words skipped by the hashing embedder.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "in", "of", "to", "is", "was",
    "for", "on", "with", "this", "that", "are", "were", "be", "been",
    "by", "from", "we", "our", "their", "which", "also",
];

/// Signed feature hashing over word unigrams and bigrams, L2-normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
            .collect();

        let mut v = vec![0f32; self.dim];
        let mut add = |feature: &str, weight: f32| {
            let hash = fnv64(feature.as_bytes());
            let idx = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            v[idx] += sign * weight;
        };
        for w in &words {
            add(w, 1.0);
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DiscoveryError> {
        Ok(self.embed_sync(text))
    }

    fn model_id(&self) -> &str {
        "feature-hashing"
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// LRU cache in front of another provider. Failures are not cached.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner, cache: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(text).cloned()
    }

    fn store(&self, text: &str, v: &[f32]) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(text.to_string(), v.to_vec());
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DiscoveryError> {
        if let Some(v) = self.lookup(text) {
            debug!(model = self.inner.model_id(), "embedding cache hit");
            return Ok(v);
        }
        let v = self.inner.embed(text).await?;
        self.store(text, &v);
        Ok(v)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, DiscoveryError> {
        let mut out: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.lookup(t)).collect();
        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&batch).await?;
            for (&i, v) in missing.iter().zip(fresh) {
                self.store(&texts[i], &v);
                out[i] = Some(v);
            }
        }
        out.into_iter()
            .map(|v| v.ok_or_else(|| DiscoveryError::EmbeddingFailed("missing vector".to_string())))
            .collect()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ── Vector helpers ────────────────────────────────────────────────────────────

/// Scales `v` to unit length in place; zero vectors are left as is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 1e-9 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity; 0 for mismatched dimensions or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (na, nb) = (l2_norm(a), l2_norm(b));
    if na < 1e-9 || nb < 1e-9 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (na * nb)).clamp(-1.0, 1.0) as f64
}
