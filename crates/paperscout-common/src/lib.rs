//! paperscout-common — Shared error types and the allow-listed HTTP client
//! used by every PaperScout crate that talks to the network.

pub mod error;
pub mod sandbox;

pub use error::{ApiError, PaperscoutError, Result};
pub use sandbox::SandboxClient;
