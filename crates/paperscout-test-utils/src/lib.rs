//! Shared testing utilities: scripted sources, embedders, validators and
//! LLM backends, plus paper fixtures.

pub mod fixtures;
pub mod mocks;

pub use fixtures::{paper, paper_with_doi};
pub use mocks::{MockEmbedder, MockLlm, MockSource, MockValidator};
