//! HTTP routes of the hello service.

use crate::{handlers, middleware::trace_context_layer, state::AppState};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// | Route           | Handler                         |
/// |-----------------|---------------------------------|
/// | `/hello`        | [`handlers::hello`]             |
/// | `/health`       | [`handlers::health_check`]      |
/// | `/health/ready` | [`handlers::readiness`]         |
/// | `/metrics`      | [`handlers::metrics`]           |
///
/// Every request gets a context bound from the adapter's inbound header.
#[must_use]
pub fn router(state: AppState) -> Router {
    let context_layer = trace_context_layer(state.adapter().config().clone());

    Router::new()
        .route("/hello", get(handlers::hello))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .layer(context_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
