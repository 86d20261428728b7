//! paperscout-ranker — composite paper ranking.
//!
//! score = w_rel·relevance + w_sim·similarity + w_cit·citation_norm

pub mod normalise;
pub mod scorer;
pub mod weights;

pub use scorer::{ComponentScores, RankedPaper, Ranker, RankerConfig};
pub use weights::RankingWeights;
