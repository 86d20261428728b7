//! paperscout-web — JSON HTTP surface for PaperScout sessions.
//!   - Session lifecycle (create, list, inspect, remove)
//!   - Search, augment and upload rounds
//!   - Ranked results and selection
//!   - Snapshots and restore
//!   - Round progress over SSE

pub mod handlers;
pub mod router;
pub mod sse;
pub mod state;
