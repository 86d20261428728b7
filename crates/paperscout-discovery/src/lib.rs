//! paperscout-discovery — multi-source paper discovery.
//!
//! - Source adapters (Google Scholar via SerpAPI, CrossRef, OpenAlex,
//!   Semantic Scholar, arXiv, Europe PMC)
//! - Cross-source deduplication
//! - Relevance validation
//! - Embeddings and the similarity index
//! - Round orchestration with per-source failure isolation

pub mod dedup;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod sources;
pub mod validator;

pub use dedup::{DedupConfig, DedupEngine, MergeOutcome};
pub use embedding::{CachedEmbedder, EmbeddingProvider, HashingEmbedder, LlmEmbedder};
pub use error::{DiscoveryError, SourceError};
pub use index::{IndexEntry, SimilarityIndex};
pub use models::{
    FailedSource, Filters, IterationKind, IterationRecord, PaperId, PaperRecord, PaperSet,
    PaperType, RawPaper, AUGMENTED_SOURCE, UPLOAD_SOURCE,
};
pub use orchestrator::{Corpus, Orchestrator, OrchestratorConfig, RoundProgress, RoundRequest, RoundStage};
pub use sources::{LiteratureSource, SourceOutcome, SourceRegistry, SourceSettings, BUILTIN_SOURCES};
pub use validator::{HeuristicValidator, LlmRelevanceValidator, RelevanceAssessment, RelevanceValidator};
