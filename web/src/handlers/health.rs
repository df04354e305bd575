//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use contextual_bus_runtime::{HealthReport, HealthStatus};

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT inspect the bus.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Health check with bus diagnostics (for readiness).
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "checks": [
///     {
///       "component": "event_bus",
///       "status": "healthy",
///       "message": null,
///       "metadata": [["pending_requests", "0"], ["overdue_requests", "0"], ["addresses", "1"]]
///     }
///   ],
///   "timestamp": "2026-01-01T00:00:00Z"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::new(vec![state.bus().health()]);

    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(report))
}
