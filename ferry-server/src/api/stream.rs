//! Live Log Stream Handler
//!
//! Server-sent event stream of a build's log lines as they are persisted.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State, rejection::PathRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use ferry_core::domain::log::{BuildId, LogLine};
use ferry_core::dto::log::{LOG_EVENT_NAME, LogEvent};
use futures_util::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Replay persisted lines with a greater `log_id` before going live
    pub since: Option<u64>,
}

/// GET /api/build/{build_id}/stream
/// Push every newly persisted log line of a build as a `message` event
///
/// The listener is registered before anything else so no line persisted
/// after the request arrives can be missed. It is released when the client
/// disconnects and the response stream is dropped.
pub async fn stream_build_logs(
    State(state): State<AppState>,
    build_id: Result<Path<BuildId>, PathRejection>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Path(build_id) = build_id.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if build_id == 0 {
        return Err(ApiError::BadRequest("build id must be positive".to_string()));
    }

    let listener = state.registry.register(build_id);

    let replay = match query.since {
        Some(since) => state.store.find_by_build(build_id, Some(since)).await?,
        None => Vec::new(),
    };
    let replayed_up_to = replay.last().map_or(0, |line| line.log_id);

    tracing::info!(
        build_id,
        listener_id = listener.id(),
        replayed = replay.len(),
        "Live log stream opened"
    );

    let live = listener.filter(move |line| line.log_id > replayed_up_to);
    let events = tokio_stream::iter(replay)
        .chain(live)
        .filter_map(|line| to_event(&line).map(Ok));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}

fn to_event(line: &LogLine) -> Option<Event> {
    match Event::default()
        .event(LOG_EVENT_NAME)
        .json_data(LogEvent::from(line))
    {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::error!(log_id = line.log_id, "Failed to serialize log event: {}", e);
            None
        }
    }
}
