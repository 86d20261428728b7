//! Relevance validation of candidate papers against the research query.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use paperscout_llm::{LlmBackend, LlmRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::DiscoveryError;
use crate::models::PaperRecord;

const ABSTRACT_WORDS: usize = 100;
const PROMPT_ABSTRACT_CHARS: usize = 1500;

const SYSTEM_PROMPT: &str = "\
You rate how relevant an academic paper is to a research query.
Answer with a single number between 0.0 and 1.0 and nothing else.
0.9 = directly addresses the query, 0.7 = clearly related, \
0.3 = tangential, 0.1 = unrelated.";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceAssessment {
    /// In [0, 1].
    pub score: f64,
    /// In [0, 1].
    pub confidence: f64,
}

#[async_trait]
pub trait RelevanceValidator: Send + Sync {
    async fn validate(&self, paper: &PaperRecord, query: &str) -> Result<RelevanceAssessment, DiscoveryError>;
}

/// Asks an LLM for a score; falls back to [`heuristic_relevance`] when the
/// answer has no usable number. Backend errors are returned as
/// `ValidationFailed`.
pub struct LlmRelevanceValidator {
    backend: Arc<dyn LlmBackend>,
}

impl LlmRelevanceValidator {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    fn user_prompt(paper: &PaperRecord, query: &str) -> String {
        let abstract_text: String = paper.abstract_text.chars().take(PROMPT_ABSTRACT_CHARS).collect();
        format!(
            "Query: {query}\nTitle: {}\nAbstract: {}\n\nScore:",
            paper.title,
            if abstract_text.is_empty() { "(none)" } else { &abstract_text }
        )
    }
}

#[async_trait]
impl RelevanceValidator for LlmRelevanceValidator {
    #[instrument(skip(self, paper, query), fields(paper_id = %paper.id, model = self.backend.model_id()))]
    async fn validate(&self, paper: &PaperRecord, query: &str) -> Result<RelevanceAssessment, DiscoveryError> {
        let req = LlmRequest::prompt(SYSTEM_PROMPT, Self::user_prompt(paper, query))
            .with_max_tokens(8)
            .with_temperature(0.0);
        let resp = self
            .backend
            .complete(req)
            .await
            .map_err(|e| DiscoveryError::ValidationFailed(e.to_string()))?;

        match parse_score(&resp.content) {
            Some(score) => {
                debug!(score, "LLM relevance score");
                Ok(RelevanceAssessment { score, confidence: if score > 0.3 { 0.8 } else { 0.5 } })
            }
            None => {
                warn!(response = %resp.content.chars().take(80).collect::<String>(), "unparseable relevance answer, using heuristic");
                Ok(heuristic_relevance(paper, query))
            }
        }
    }
}

/// Scores with [`heuristic_relevance`] only. Used when no LLM is configured.
#[derive(Debug, Clone, Default)]
pub struct HeuristicValidator;

#[async_trait]
impl RelevanceValidator for HeuristicValidator {
    async fn validate(&self, paper: &PaperRecord, query: &str) -> Result<RelevanceAssessment, DiscoveryError> {
        Ok(heuristic_relevance(paper, query))
    }
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]*\.?[0-9]+)").expect("static regex"))
}

/// Extracts a score from an LLM answer: the whole answer if it is a number,
/// else the first decimal found in it. Values outside [0, 1] are rejected.
pub fn parse_score(content: &str) -> Option<f64> {
    let trimmed = content.trim();
    let value = match trimmed.parse::<f64>() {
        Ok(v) => v,
        Err(_) => number_regex().find(trimmed)?.as_str().parse::<f64>().ok()?,
    };
    (0.0..=1.0).contains(&value).then_some(value)
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Token-overlap relevance: title overlap (weight 0.6), overlap with the
/// first 100 abstract words (0.4), plus up to 0.1 for citations.
/// Confidence is 0.7 when any query word appears in the title, else 0.4.
pub fn heuristic_relevance(paper: &PaperRecord, query: &str) -> RelevanceAssessment {
    let query_words: HashSet<String> = words(query).collect();
    if query_words.is_empty() {
        return RelevanceAssessment { score: 0.0, confidence: 0.4 };
    }
    let title_words: HashSet<String> = words(&paper.title).collect();
    let abstract_words: HashSet<String> = words(&paper.abstract_text).take(ABSTRACT_WORDS).collect();

    let n = query_words.len() as f64;
    let title_hits = query_words.intersection(&title_words).count();
    let title_overlap = title_hits as f64 / n;
    let abstract_overlap = query_words.intersection(&abstract_words).count() as f64 / n;
    let citation_boost = (paper.citation_count as f64 / 1000.0).min(0.1);

    let score = (title_overlap * 0.6 + abstract_overlap * 0.4 + citation_boost).clamp(0.0, 1.0);
    RelevanceAssessment { score, confidence: if title_hits > 0 { 0.7 } else { 0.4 } }
}
