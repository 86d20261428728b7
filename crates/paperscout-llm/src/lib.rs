//! paperscout-llm — LLM backend abstraction layer.
//!
//! The relevance validator, the keyword summarizer used for query
//! augmentation, and the embedding provider all talk to a model through the
//! `LlmBackend` trait; `LlmRouter` chains several backends so a remote outage
//! falls through to the next configured one.

pub mod backend;
pub mod router;

pub use backend::{LlmBackend, LlmError, LlmRequest, LlmResponse, Message};
pub use router::LlmRouter;
