//! Server-Sent Events (SSE) streaming of round progress.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_core::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only relay events of this session's rounds.
    pub session_id: Option<Uuid>,
}

/// GET /api/events - round progress as it happens
pub async fn sse_handler(
    State(state): State<SharedState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        // Lagged receivers skip the dropped events.
        let event = result.ok()?;
        if filter.session_id.is_some() && event.correlation_id != filter.session_id {
            return None;
        }
        serde_json::to_string(&event)
            .ok()
            .map(|data| Ok(Event::default().event("round_progress").data(data)))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
