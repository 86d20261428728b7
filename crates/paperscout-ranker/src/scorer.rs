//! Composite paper score computation and ordering.

use std::cmp::Ordering;

use paperscout_discovery::{PaperRecord, PaperSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalise::{citation_norm, DEFAULT_CITATION_SATURATION};
use crate::weights::RankingWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub weights: RankingWeights,
    /// Papers below this relevance are left out of rankings (unscored
    /// relevance counts as 0).
    pub min_relevance: f64,
    pub top_n: usize,
    pub citation_saturation: u64,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            min_relevance: 0.0,
            top_n: 20,
            citation_saturation: DEFAULT_CITATION_SATURATION,
        }
    }
}

/// Normalised component scores (all in [0, 1]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub relevance: f64,
    pub similarity: f64,
    pub citation: f64,
}

impl ComponentScores {
    /// Missing relevance and similarity count as 0.
    pub fn for_paper(paper: &PaperRecord, citation_saturation: u64) -> Self {
        Self {
            relevance: paper.relevance_score.unwrap_or(0.0).clamp(0.0, 1.0),
            similarity: paper.similarity_score.unwrap_or(0.0).clamp(0.0, 1.0),
            citation: citation_norm(paper.citation_count, citation_saturation),
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.relevance, self.similarity, self.citation]
    }
}

/// S(p) = Σ(w_i × n_i), clamped to [0, 1].
pub fn compute_composite_score(components: &ComponentScores, weights: &RankingWeights) -> f64 {
    components
        .as_array()
        .iter()
        .zip(weights.as_array().iter())
        .map(|(n, w)| n * w)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPaper {
    pub paper: PaperRecord,
    pub composite: f64,
    pub components: ComponentScores,
}

#[derive(Debug, Clone, Default)]
pub struct Ranker {
    config: RankerConfig,
}

impl Ranker {
    /// Weights that do not sum to 1 are renormalised.
    pub fn new(mut config: RankerConfig) -> Self {
        if !config.weights.validate() {
            debug!(weights = ?config.weights, "renormalising ranking weights");
            config.weights.normalise();
        }
        Self { config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    pub fn score(&self, paper: &PaperRecord) -> RankedPaper {
        let components = ComponentScores::for_paper(paper, self.config.citation_saturation);
        RankedPaper {
            paper: paper.clone(),
            composite: compute_composite_score(&components, &self.config.weights),
            components,
        }
    }

    fn eligible(&self, paper: &PaperRecord) -> bool {
        paper.relevance_score.unwrap_or(0.0) >= self.config.min_relevance
    }

    /// Every eligible paper, best first. Ties break on citation count
    /// (descending), then insertion order.
    pub fn rank(&self, papers: &PaperSet) -> Vec<RankedPaper> {
        // PaperSet iterates in insertion order and the sort is stable.
        let mut ranked: Vec<RankedPaper> = papers
            .iter()
            .filter(|p| self.eligible(p))
            .map(|p| self.score(p))
            .collect();
        ranked.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.paper.citation_count.cmp(&a.paper.citation_count))
        });
        ranked
    }

    /// The best `n` papers, or the configured `top_n` when `n` is `None`.
    pub fn top_n(&self, papers: &PaperSet, n: Option<usize>) -> Vec<RankedPaper> {
        let mut ranked = self.rank(papers);
        ranked.truncate(n.unwrap_or(self.config.top_n));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_discovery::RawPaper;
    use pretty_assertions::assert_eq;

    fn record(title: &str, relevance: Option<f64>, similarity: Option<f64>, cites: u64) -> PaperRecord {
        let raw = RawPaper { title: title.into(), citation_count: cites, ..Default::default() };
        let mut p = PaperRecord::from_raw(raw, "test", title.to_lowercase(), 0);
        p.relevance_score = relevance;
        p.similarity_score = similarity;
        p
    }

    fn set(records: Vec<PaperRecord>) -> PaperSet {
        records.into()
    }

    fn titles(ranked: &[RankedPaper]) -> Vec<String> {
        ranked.iter().map(|r| r.paper.title.clone()).collect()
    }

    #[test]
    fn test_composite_uses_default_weights() {
        let c = ComponentScores { relevance: 1.0, similarity: 1.0, citation: 0.0 };
        assert!((compute_composite_score(&c, &RankingWeights::default()) - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_missing_scores_default_to_zero() {
        let ranker = Ranker::default();
        let r = ranker.score(&record("x", None, None, 0));
        assert_eq!(r.composite, 0.0);
        assert_eq!(r.components, ComponentScores { relevance: 0.0, similarity: 0.0, citation: 0.0 });
    }

    #[test]
    fn test_ordering_and_tie_breaks() {
        let ranker = Ranker::default();
        let papers = set(vec![
            record("low", Some(0.1), Some(0.1), 0),
            record("tie-first", Some(0.5), Some(0.5), 0),
            record("high", Some(0.9), Some(0.9), 10),
            record("tie-second", Some(0.5), Some(0.5), 0),
        ]);
        assert_eq!(titles(&ranker.rank(&papers)), vec!["high", "tie-first", "tie-second", "low"]);
    }

    #[test]
    fn test_citation_breaks_equal_composite() {
        // Saturation 0 makes every cited paper score citation 1.0.
        let ranker = Ranker::new(RankerConfig { citation_saturation: 0, ..Default::default() });
        let papers = set(vec![record("fewer", Some(0.5), None, 3), record("more", Some(0.5), None, 300)]);
        assert_eq!(titles(&ranker.rank(&papers)), vec!["more", "fewer"]);
    }

    #[test]
    fn test_min_relevance_excludes_but_keeps_set() {
        let ranker = Ranker::new(RankerConfig { min_relevance: 0.3, ..Default::default() });
        let papers = set(vec![
            record("relevant", Some(0.8), Some(0.2), 0),
            record("unscored", None, Some(0.99), 5000),
            record("weak", Some(0.2), Some(0.9), 0),
        ]);
        assert_eq!(titles(&ranker.top_n(&papers, None)), vec!["relevant"]);
        assert_eq!(papers.len(), 3);
    }

    #[test]
    fn test_top_n_truncates_and_is_deterministic() {
        let ranker = Ranker::default();
        let papers = set((0..30).map(|i| record(&format!("p{i:02}"), Some(i as f64 / 30.0), None, 0)).collect());
        let top = ranker.top_n(&papers, None);
        assert_eq!(top.len(), 20);
        assert_eq!(top[0].paper.title, "p29");
        assert_eq!(titles(&top), titles(&ranker.top_n(&papers, None)));
        assert_eq!(ranker.top_n(&papers, Some(3)).len(), 3);
    }

    #[test]
    fn test_invalid_weights_are_renormalised() {
        let ranker = Ranker::new(RankerConfig {
            weights: RankingWeights { relevance: 2.0, similarity: 1.0, citation: 1.0 },
            ..Default::default()
        });
        assert!(ranker.config().weights.validate());
        assert!((ranker.config().weights.relevance - 0.5).abs() < 1e-9);
    }
}
