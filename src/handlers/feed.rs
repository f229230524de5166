use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::error_response;
use crate::AppState;

/// GET /api/feed/status
pub async fn status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.feed.status()).into_response()
}

/// POST /api/feed/reconnect
///
/// Tears the live feed down and subscribes again. Nothing reconnects on its
/// own after an error; this is the only way back.
pub async fn reconnect(State(state): State<Arc<AppState>>) -> Response {
    state.feed.reconnect().await;
    match state.feed.subscribe().await {
        Ok(()) => Json(state.feed.status()).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}
