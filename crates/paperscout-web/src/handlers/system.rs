//! Service health and configuration overview.

use axum::{extract::State, Json};
use paperscout_ranker::RankingWeights;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub default_sources: Vec<String>,
    pub ranking_weights: RankingWeights,
    pub top_n: usize,
}

/// GET /api/health
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let ranker = state.sessions.ranker().config();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.list_sessions().await.len(),
        default_sources: state.sessions.default_sources().to_vec(),
        ranking_weights: ranker.weights,
        top_n: ranker.top_n,
    })
}
