//! Axum router — maps all URL paths to handlers.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{
    sessions::{
        augment, create_session, delete_session, get_session, list_iterations, list_sessions,
        mark_selected, restore, snapshot, start_search, top_n, upload,
    },
    system::health,
};
use crate::sse::sse_handler;
use crate::state::{AppState, SharedState};

/// Build and return the full Axum router.
pub fn build_router(state: AppState) -> Router {
    let shared: SharedState = Arc::new(state);

    Router::new()
        .route("/api/health", get(health))

        // SSE streaming
        .route("/api/events", get(sse_handler))

        // Sessions
        .route("/api/sessions",         get(list_sessions).post(create_session))
        .route("/api/sessions/restore", post(restore))
        .route("/api/sessions/{id}",    get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/iterations", get(list_iterations))
        .route("/api/sessions/{id}/search",     post(start_search))
        .route("/api/sessions/{id}/augment",    post(augment))
        .route("/api/sessions/{id}/uploads",    post(upload))
        .route("/api/sessions/{id}/top",        get(top_n))
        .route("/api/sessions/{id}/selection",  put(mark_selected))
        .route("/api/sessions/{id}/snapshot",   get(snapshot))

        // Middleware
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}
