//! Session endpoints: lifecycle, rounds, ranking, selection, snapshots.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use paperscout_common::ApiError;
use paperscout_discovery::{Filters, IterationRecord, PaperId, RawPaper};
use paperscout_ranker::RankedPaper;
use paperscout_session::{AugmentOutcome, SessionId, SessionSnapshot, SessionSummary};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::SharedState;

/// Hard cap on `GET .../top?n=`.
const MAX_TOP_N: usize = 200;

// === Request / response types ===

#[derive(Debug, Serialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: Filters,
    /// Omitted: every configured source.
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub paper_ids: Vec<PaperId>,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub papers: Vec<RawPaper>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TopResponse {
    pub session_id: SessionId,
    pub total: usize,
    pub papers: Vec<RankedPaper>,
}

// === Lifecycle ===

/// POST /api/sessions
pub async fn create_session(State(state): State<SharedState>) -> impl IntoResponse {
    let session_id = state.sessions.create_session().await;
    (StatusCode::CREATED, Json(CreatedSession { session_id }))
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<SharedState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list_sessions().await)
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionSummary>, ApiError> {
    Ok(Json(state.sessions.summary(id).await?))
}

/// DELETE /api/sessions/{id}
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    state.sessions.remove_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/sessions/{id}/iterations
pub async fn list_iterations(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Vec<IterationRecord>>, ApiError> {
    Ok(Json(state.sessions.iterations(id).await?))
}

// === Rounds ===

/// POST /api/sessions/{id}/search - StartSearch
pub async fn start_search(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<IterationRecord>, ApiError> {
    let record = state
        .sessions
        .start_search(id, &req.query, req.filters, req.sources)
        .await
        .inspect_err(|e| warn!(session_id = %id, error = %e, "search rejected"))?;
    Ok(Json(record))
}

/// POST /api/sessions/{id}/augment - Augment from the given selection
pub async fn augment(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<AugmentOutcome>, ApiError> {
    let outcome = state
        .sessions
        .augment(id, &req.paper_ids)
        .await
        .inspect_err(|e| warn!(session_id = %id, error = %e, "augment rejected"))?;
    Ok(Json(outcome))
}

/// POST /api/sessions/{id}/uploads - inject pre-parsed papers
pub async fn upload(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<IterationRecord>, ApiError> {
    if req.papers.is_empty() {
        debug!(session_id = %id, "empty upload rejected");
        return Err(ApiError::bad_request("no papers to upload"));
    }
    Ok(Json(state.sessions.upload(id, req.papers).await?))
}

// === Results and selection ===

/// GET /api/sessions/{id}/top?n= - GetTopN
pub async fn top_n(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Query(q): Query<TopQuery>,
) -> Result<Json<TopResponse>, ApiError> {
    let papers = state.sessions.get_top_n(id, q.n.map(|n| n.min(MAX_TOP_N))).await?;
    Ok(Json(TopResponse { session_id: id, total: papers.len(), papers }))
}

/// PUT /api/sessions/{id}/selection - MarkSelected
pub async fn mark_selected(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Json(req): Json<SelectionRequest>,
) -> Result<StatusCode, ApiError> {
    state.sessions.mark_selected(id, &req.paper_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

// === Snapshots ===

/// GET /api/sessions/{id}/snapshot
pub async fn snapshot(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.sessions.snapshot(id).await?))
}

/// POST /api/sessions/restore
pub async fn restore(
    State(state): State<SharedState>,
    Json(snapshot): Json<SessionSnapshot>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = state
        .sessions
        .restore(snapshot)
        .await
        .inspect_err(|e| warn!(error = %e, "snapshot restore rejected"))?;
    Ok((StatusCode::CREATED, Json(CreatedSession { session_id })))
}
