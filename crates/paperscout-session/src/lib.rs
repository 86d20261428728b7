//! paperscout-session — Search sessions over the discovery pipeline.
//!
//! A session accumulates papers across rounds: an initial search, any number
//! of follow-up searches, uploads, and augmented rounds whose query is
//! derived from papers the user selected. The [`SessionManager`] is the
//! only entry point callers need.

pub mod augment;
pub mod error;
pub mod manager;
pub mod session;
pub mod snapshot;

pub use augment::{
    frequency_fallback, AugmentConfig, AugmentStrategy, AugmentedQuery, KeywordSummarizer,
    LlmKeywordSummarizer, QueryAugmenter,
};
pub use error::{AugmentationFailed, SessionError};
pub use manager::{AugmentOutcome, SessionManager};
pub use session::{RelevanceStats, SearchSession, SessionId, SessionState, SessionSummary};
pub use snapshot::SessionSnapshot;
