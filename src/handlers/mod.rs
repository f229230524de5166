use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod analytics;
pub mod feed;

/// Every route the service exposes. All of them only read the views, except
/// the filter change and the feed reconnect, which are forwarded as-is.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/analytics", get(analytics::report))
        .route(
            "/analytics/filter",
            get(analytics::current_filter).put(analytics::set_filter),
        )
        .route("/analytics/export/:view", get(analytics::export))
        .route("/analytics/stream", get(analytics::stream))
        .route("/feed/status", get(feed::status))
        .route("/feed/reconnect", post(feed::reconnect));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// `{"error": message}` with the given status.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}
