use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use super::error_response;
use crate::{
    boundary::ExportView,
    error::EngineError,
    models::{DateRange, EventTypeSet, Filter},
    AppState,
};

#[derive(Deserialize)]
pub struct FilterRequest {
    start: NaiveDate,
    end: NaiveDate,
    #[serde(default)]
    event_types: EventTypeSet,
}

/// GET /api/analytics
pub async fn report(State(state): State<Arc<AppState>>) -> Response {
    Json(state.analytics.report()).into_response()
}

/// GET /api/analytics/filter
pub async fn current_filter(State(state): State<Arc<AppState>>) -> Response {
    Json(state.analytics.current_filter()).into_response()
}

/// PUT /api/analytics/filter
///
/// Recomputes every view for the requested range and types, then returns
/// the new report.
pub async fn set_filter(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FilterRequest>,
) -> Response {
    let range = match DateRange::new(request.start, request.end) {
        Ok(range) => range,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state
        .analytics
        .set_filter(Filter::new(range, request.event_types))
        .await
    {
        Ok(()) => Json(state.analytics.report()).into_response(),
        Err(e @ EngineError::RangeTooLong { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(EngineError::Superseded) => {
            error_response(StatusCode::CONFLICT, EngineError::Superseded.to_string())
        }
        Err(e @ EngineError::Store(_)) => {
            tracing::error!("Filter change failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// GET /api/analytics/export/:view
pub async fn export(State(state): State<Arc<AppState>>, Path(view): Path<String>) -> Response {
    match view.parse::<ExportView>() {
        Ok(view) => Json(state.analytics.export_rows(view)).into_response(),
        Err(msg) => error_response(StatusCode::NOT_FOUND, msg),
    }
}

/// GET /api/analytics/stream
///
/// Server-sent events, one `tracking_event` per merged live event.
pub async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = BroadcastStream::new(state.analytics.subscribe_merged()).filter_map(|merged| {
        let event = merged.ok()?;
        Event::default()
            .event("tracking_event")
            .json_data(event.as_ref())
            .map_err(|e| tracing::debug!("Could not encode live event: {}", e))
            .ok()
            .map(Ok)
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
