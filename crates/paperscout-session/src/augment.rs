//! Query augmentation from user-selected papers.
//!
//! Strategy chain:
//!   1. Ask the keyword summarizer (an LLM) for a sharper academic query
//!   2. On any failure, append the most frequent terms of the selection
//!   3. If no term qualifies, reuse the original query unchanged
//!
//! The augmenter itself never fails.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use paperscout_discovery::PaperRecord;
use paperscout_llm::{LlmBackend, LlmRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::AugmentationFailed;

/// Words the summarizer is told to avoid; an answer made only of these is
/// rejected.
pub const GENERIC_WORDS: &[&str] = &["paper", "study", "research", "analysis"];

/// Dropped before counting frequencies.
pub const STOP_WORDS: &[&str] = &[
    "abstract", "paper", "study", "research", "using", "method",
    "approach", "based", "results", "data", "model", "analysis",
];

const PROMPT_ABSTRACT_CHARS: usize = 300;
const FALLBACK_ABSTRACT_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "\
You are a research assistant improving a literature search query.
Return ONLY the improved search query, nothing else.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Frequent terms appended by the fallback.
    pub top_k: usize,
    /// Longest summarizer answer accepted, in words.
    pub max_words: usize,
    /// Selected papers shown to the summarizer.
    pub max_prompt_papers: usize,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self { top_k: 3, max_words: 20, max_prompt_papers: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentStrategy {
    Llm,
    Frequency,
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedQuery {
    pub query: String,
    pub strategy: AugmentStrategy,
}

#[async_trait]
pub trait KeywordSummarizer: Send + Sync {
    async fn summarize_keywords(&self, papers: &[PaperRecord], original_query: &str) -> Result<String, AugmentationFailed>;
}

// ── LLM summarizer ────────────────────────────────────────────────────────────

pub struct LlmKeywordSummarizer {
    backend: Arc<dyn LlmBackend>,
    max_words: usize,
    max_papers: usize,
}

impl LlmKeywordSummarizer {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        let defaults = AugmentConfig::default();
        Self { backend, max_words: defaults.max_words, max_papers: defaults.max_prompt_papers }
    }

    pub fn with_limits(mut self, config: &AugmentConfig) -> Self {
        self.max_words = config.max_words;
        self.max_papers = config.max_prompt_papers;
        self
    }

    fn user_prompt(&self, papers: &[PaperRecord], original_query: &str) -> Option<String> {
        let summaries: Vec<String> = papers
            .iter()
            .filter(|p| !p.title.trim().is_empty())
            .take(self.max_papers)
            .enumerate()
            .map(|(i, p)| {
                let mut s = format!("Paper {}: {}", i + 1, p.title);
                if !p.abstract_text.is_empty() {
                    let excerpt: String = p.abstract_text.chars().take(PROMPT_ABSTRACT_CHARS).collect();
                    s.push_str("\nAbstract: ");
                    s.push_str(&excerpt);
                }
                s
            })
            .collect();
        if summaries.is_empty() {
            return None;
        }
        Some(format!(
            "Original search query: \"{original_query}\"\n\n\
             Relevant papers found so far:\n\n{}\n\n\
             Write an improved, more specific search query that uses the key technical \
             concepts and methods of these papers.\n\
             - at most 15 words\n\
             - technical, academic language suitable for bibliographic databases\n\
             - do NOT use generic words like \"paper\", \"study\", \"research\", \"analysis\"",
            summaries.join("\n\n")
        ))
    }

    /// Trims quotes and rejects empty, overlong or all-generic answers.
    pub fn clean_answer(&self, content: &str) -> Option<String> {
        let answer = content.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        let words: Vec<&str> = answer.split_whitespace().collect();
        if words.is_empty() || words.len() > self.max_words {
            return None;
        }
        let all_generic = words.iter().all(|w| {
            let w = w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            w.is_empty() || GENERIC_WORDS.contains(&w.as_str())
        });
        (!all_generic).then(|| words.join(" "))
    }
}

#[async_trait]
impl KeywordSummarizer for LlmKeywordSummarizer {
    #[instrument(skip(self, papers), fields(n = papers.len(), model = self.backend.model_id()))]
    async fn summarize_keywords(&self, papers: &[PaperRecord], original_query: &str) -> Result<String, AugmentationFailed> {
        let prompt = self
            .user_prompt(papers, original_query)
            .ok_or_else(|| AugmentationFailed("no paper content to summarize".into()))?;
        let req = LlmRequest::prompt(SYSTEM_PROMPT, prompt).with_max_tokens(64).with_temperature(0.3);
        let resp = self
            .backend
            .complete(req)
            .await
            .map_err(|e| AugmentationFailed(e.to_string()))?;
        self.clean_answer(&resp.content)
            .ok_or_else(|| AugmentationFailed(format!("unusable answer: {:?}", resp.content.trim())))
    }
}

// ── Frequency fallback ────────────────────────────────────────────────────────

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-zA-Z]{4,}\b").expect("static regex"))
}

/// Appends the `top_k` most frequent selection terms (count >= 2, not stop
/// words, not already in the query) to `original_query`. Ties break
/// alphabetically. `None` when no term qualifies.
pub fn frequency_fallback(papers: &[PaperRecord], original_query: &str, top_k: usize) -> Option<String> {
    let in_query: HashSet<String> = original_query.split_whitespace().map(str::to_lowercase).collect();

    let mut text = String::new();
    for p in papers {
        text.push_str(&p.title);
        text.push(' ');
    }
    for p in papers {
        text.extend(p.abstract_text.chars().take(FALLBACK_ABSTRACT_CHARS));
        text.push(' ');
    }
    let text = text.to_lowercase();

    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    for m in word_regex().find_iter(&text) {
        let w = m.as_str();
        if !STOP_WORDS.contains(&w) && !in_query.contains(w) {
            *freq.entry(w).or_default() += 1;
        }
    }

    // BTreeMap iterates alphabetically and the sort is stable.
    let mut terms: Vec<(&str, usize)> = freq.into_iter().filter(|(_, n)| *n >= 2).collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1));
    let picked: Vec<&str> = terms.into_iter().take(top_k).map(|(w, _)| w).collect();
    if picked.is_empty() {
        return None;
    }
    Some(format!("{} {}", original_query.trim(), picked.join(" ")))
}

// ── Augmenter ─────────────────────────────────────────────────────────────────

pub struct QueryAugmenter {
    summarizer: Option<Arc<dyn KeywordSummarizer>>,
    config: AugmentConfig,
}

impl QueryAugmenter {
    pub fn new(summarizer: Option<Arc<dyn KeywordSummarizer>>, config: AugmentConfig) -> Self {
        Self { summarizer, config }
    }

    /// Frequency fallback only.
    pub fn offline(config: AugmentConfig) -> Self {
        Self::new(None, config)
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Derives the next round's query from `selected`. Always returns a
    /// non-empty query when `original_query` is non-empty.
    #[instrument(skip(self, selected), fields(selected = selected.len()))]
    pub async fn augment(&self, original_query: &str, selected: &[PaperRecord]) -> AugmentedQuery {
        if let Some(summarizer) = &self.summarizer {
            match summarizer.summarize_keywords(selected, original_query).await {
                Ok(query) if !query.trim().is_empty() => {
                    info!(%query, "augmented query from summarizer");
                    return AugmentedQuery { query, strategy: AugmentStrategy::Llm };
                }
                Ok(_) => warn!("summarizer returned an empty query, using frequency fallback"),
                Err(e) => warn!(error = %e, "summarizer failed, using frequency fallback"),
            }
        }

        match frequency_fallback(selected, original_query, self.config.top_k) {
            Some(query) => {
                info!(%query, "augmented query from term frequencies");
                AugmentedQuery { query, strategy: AugmentStrategy::Frequency }
            }
            None => {
                debug!("no frequent terms in selection, reusing original query");
                AugmentedQuery { query: original_query.trim().to_string(), strategy: AugmentStrategy::Original }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_discovery::RawPaper;
    use paperscout_llm::{LlmError, LlmResponse};
    use pretty_assertions::assert_eq;

    fn record(title: &str, abstract_text: &str) -> PaperRecord {
        let raw = RawPaper { title: title.into(), abstract_text: abstract_text.into(), ..Default::default() };
        PaperRecord::from_raw(raw, "test", title.to_lowercase(), 0)
    }

    struct Answer(Result<&'static str, ()>);

    #[async_trait]
    impl LlmBackend for Answer {
        async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
            match self.0 {
                Ok(text) => Ok(LlmResponse {
                    content: text.to_string(),
                    model: "answer".into(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                }),
                Err(()) => Err(LlmError::Unavailable("down".into())),
            }
        }
        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
            Err(LlmError::Unavailable("no embeddings".into()))
        }
        fn model_id(&self) -> &str { "answer" }
        fn is_local(&self) -> bool { true }
    }

    fn selection() -> Vec<PaperRecord> {
        vec![
            record("Message passing on molecular graphs", "Molecular property prediction with message passing."),
            record("Equivariant message passing", "Equivariant networks for molecular dynamics."),
        ]
    }

    #[test]
    fn test_frequency_fallback_picks_top_terms() {
        let q = frequency_fallback(&selection(), "graph neural networks", 3).unwrap();
        // message, molecular and passing all appear three times.
        assert_eq!(q, "graph neural networks message molecular passing");
    }

    #[test]
    fn test_frequency_fallback_ties_are_alphabetical() {
        let papers = vec![record("zebra alpha", "zebra alpha"), record("other words", "")];
        assert_eq!(frequency_fallback(&papers, "q", 3).unwrap(), "q alpha zebra");
    }

    #[test]
    fn test_frequency_fallback_skips_stop_words_and_query_terms() {
        let papers = vec![
            record("Research using data", "research using data model"),
            record("Graph study", "graph graph"),
        ];
        assert_eq!(frequency_fallback(&papers, "graph", 3), None);
    }

    #[test]
    fn test_clean_answer() {
        let s = LlmKeywordSummarizer::new(Arc::new(Answer(Ok(""))));
        assert_eq!(s.clean_answer("  \"equivariant message passing\"\n").as_deref(), Some("equivariant message passing"));
        assert_eq!(s.clean_answer(""), None);
        assert_eq!(s.clean_answer("Research paper study."), None);
        assert_eq!(s.clean_answer(&"word ".repeat(21)), None);
    }

    #[tokio::test]
    async fn test_llm_strategy() {
        let summarizer = LlmKeywordSummarizer::new(Arc::new(Answer(Ok("equivariant molecular message passing"))));
        let augmenter = QueryAugmenter::new(Some(Arc::new(summarizer)), AugmentConfig::default());
        let out = augmenter.augment("graph neural networks", &selection()).await;
        assert_eq!(out.strategy, AugmentStrategy::Llm);
        assert_eq!(out.query, "equivariant molecular message passing");
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_to_frequency() {
        let summarizer = LlmKeywordSummarizer::new(Arc::new(Answer(Err(()))));
        let augmenter = QueryAugmenter::new(Some(Arc::new(summarizer)), AugmentConfig::default());
        let out = augmenter.augment("graph neural networks", &selection()).await;
        assert_eq!(out.strategy, AugmentStrategy::Frequency);
        assert!(out.query.starts_with("graph neural networks "));
    }

    #[tokio::test]
    async fn test_total_failure_returns_original() {
        let augmenter = QueryAugmenter::offline(AugmentConfig::default());
        let out = augmenter.augment("graph neural networks", &[record("Unique title", "")]).await;
        assert_eq!(out, AugmentedQuery { query: "graph neural networks".into(), strategy: AugmentStrategy::Original });
    }
}
