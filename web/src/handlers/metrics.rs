//! Prometheus scrape endpoint.

use crate::{error::AppError, state::AppState};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

/// Render metrics in the Prometheus text format.
///
/// # Endpoint
///
/// ```text
/// GET /metrics
/// ```
///
/// Responds 503 when no exporter was configured or its recorder could not
/// be installed.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics().and_then(|server| server.render()) {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => AppError::unavailable("Metrics exporter is not running").into_response(),
    }
}
