//! HTTP handlers for all API routes.

pub mod sessions;
pub mod system;
