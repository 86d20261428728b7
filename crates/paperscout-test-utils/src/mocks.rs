//! Scripted stand-ins for the network-facing traits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use paperscout_discovery::{
    DiscoveryError, EmbeddingProvider, Filters, HashingEmbedder, LiteratureSource, PaperRecord,
    RawPaper, RelevanceAssessment, RelevanceValidator, SourceError, SourceOutcome,
};
use paperscout_llm::{LlmBackend, LlmError, LlmRequest, LlmResponse};
use tokio::time::Instant;

// ── Source ────────────────────────────────────────────────────────────────────

/// A source that returns a fixed list after an optional delay.
pub struct MockSource {
    name: String,
    papers: Vec<RawPaper>,
    delay: Duration,
    error: Option<SourceError>,
    ignore_deadline: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            papers: vec![],
            delay: Duration::ZERO,
            error: None,
            ignore_deadline: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(vec![]),
        }
    }

    pub fn with_papers(mut self, papers: Vec<RawPaper>) -> Self {
        self.papers = papers;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns `error` alongside the scripted papers.
    pub fn failing(mut self, error: SourceError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sleeps for the full delay even past the deadline.
    pub fn ignoring_deadline(mut self) -> Self {
        self.ignore_deadline = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LiteratureSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, filters: &Filters, deadline: Instant) -> SourceOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.to_string());
        }
        if self.ignore_deadline {
            tokio::time::sleep(self.delay).await;
        } else if tokio::time::timeout_at(deadline, tokio::time::sleep(self.delay)).await.is_err() {
            return SourceOutcome { timed_out: true, ..Default::default() };
        }
        SourceOutcome {
            papers: self.papers.iter().filter(|p| filters.accepts(p)).cloned().collect(),
            error: self.error.clone(),
            timed_out: false,
        }
    }
}

// ── Embedder ──────────────────────────────────────────────────────────────────

/// Feature-hashing embedder that fails for texts containing a marker.
pub struct MockEmbedder {
    inner: HashingEmbedder,
    fail_marker: Option<String>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { inner: HashingEmbedder::new(64), fail_marker: None, calls: AtomicUsize::new(0) }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_marker.as_deref().is_some_and(|m| text.contains(m)) {
            return Err(DiscoveryError::EmbeddingFailed("scripted failure".to_string()));
        }
        Ok(self.inner.embed_sync(text))
    }

    fn model_id(&self) -> &str {
        "mock-embedder"
    }
}

// ── Validator ─────────────────────────────────────────────────────────────────

/// Scores by title keyword: 0.9 when the title contains any query word,
/// else 0.1. Can be told to fail every call.
#[derive(Default)]
pub struct MockValidator {
    fail: bool,
    calls: AtomicUsize,
}

impl MockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelevanceValidator for MockValidator {
    async fn validate(&self, paper: &PaperRecord, query: &str) -> Result<RelevanceAssessment, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DiscoveryError::ValidationFailed("scripted failure".to_string()));
        }
        let title = paper.title.to_lowercase();
        let hit = query.split_whitespace().any(|w| title.contains(&w.to_lowercase()));
        Ok(RelevanceAssessment { score: if hit { 0.9 } else { 0.1 }, confidence: 0.8 })
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────────

/// Replays queued completions, then a default one. Records every prompt.
pub struct MockLlm {
    replies: Mutex<VecDeque<Result<String, String>>>,
    default_reply: Option<String>,
    prompts: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self { replies: Mutex::new(VecDeque::new()), default_reply: None, prompts: Mutex::new(vec![]) }
    }

    /// Every call without a queued reply answers `text`.
    pub fn always(text: &str) -> Self {
        Self { default_reply: Some(text.to_string()), ..Self::new() }
    }

    /// Every call without a queued reply fails.
    pub fn unavailable() -> Self {
        Self::new()
    }

    pub fn then_reply(self, text: &str) -> Self {
        if let Ok(mut r) = self.replies.lock() {
            r.push_back(Ok(text.to_string()));
        }
        self
    }

    pub fn then_fail(self, message: &str) -> Self {
        if let Ok(mut r) = self.replies.lock() {
            r.push_back(Err(message.to_string()));
        }
        self
    }

    pub fn prompts(&self) -> Vec<LlmRequest> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(req);
        }
        let queued = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        let reply = match queued {
            Some(r) => r,
            None => self.default_reply.clone().ok_or_else(|| "no scripted reply".to_string()),
        };
        match reply {
            Ok(content) => Ok(LlmResponse {
                content,
                model: "mock-llm".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
            }),
            Err(msg) => Err(LlmError::Unavailable(msg)),
        }
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
        let hashing = HashingEmbedder::new(64);
        Ok(texts.iter().map(|t| hashing.embed_sync(t)).collect())
    }

    fn model_id(&self) -> &str {
        "mock-llm"
    }

    fn is_local(&self) -> bool {
        true
    }
}
