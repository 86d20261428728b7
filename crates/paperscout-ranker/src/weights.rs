//! Weight vector for composite paper ranking.

use serde::{Deserialize, Serialize};

/// The 3-component weight vector. Weights sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    /// Validator relevance to the query
    pub relevance: f64,
    /// Cosine similarity to the round's reference vector
    pub similarity: f64,
    /// Log-scaled citation count
    pub citation: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            relevance:  0.50,
            similarity: 0.35,
            citation:   0.15,
        }
    }
}

impl RankingWeights {
    fn sum(&self) -> f64 {
        self.relevance + self.similarity + self.citation
    }

    /// All weights non-negative and summing to ~1.0
    pub fn validate(&self) -> bool {
        self.as_array().iter().all(|w| *w >= 0.0 && w.is_finite()) && (self.sum() - 1.0).abs() < 1e-6
    }

    /// Renormalise weights so they sum to 1.0. Negative weights are zeroed
    /// first; an all-zero vector falls back to the defaults.
    pub fn normalise(&mut self) {
        for w in [&mut self.relevance, &mut self.similarity, &mut self.citation] {
            if !w.is_finite() || *w < 0.0 {
                *w = 0.0;
            }
        }
        let sum = self.sum();
        if sum > 0.0 {
            self.relevance  /= sum;
            self.similarity /= sum;
            self.citation   /= sum;
        } else {
            *self = Self::default();
        }
    }

    pub fn normalised(mut self) -> Self {
        self.normalise();
        self
    }

    /// Convert to array for iteration.
    pub fn as_array(&self) -> [f64; 3] {
        [self.relevance, self.similarity, self.citation]
    }
}
