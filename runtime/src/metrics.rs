//! Prometheus metrics for observability and monitoring.
//!
//! The bus records:
//! - publishes and sends by kind, and consumed deliveries
//! - requests started, completed, timed out, and failed, plus their duration
//! - interceptor aborts by direction
//! - unroutable messages and late replies
//! - the number of in-flight requests
//!
//! # Example
//!
//! ```rust,no_run
//! use contextual_bus_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//!
//! // Serve `server.render()` from a `/metrics` route
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter.
///
/// Installs the global recorder and renders the scrape payload; the
/// application mounts [`MetricsServer::render`] on its own HTTP route.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an exporter that has not been started yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and leaves [`MetricsServer::handle`] empty.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                    30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the exporter hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "event_bus_messages_published_total",
        "Total number of one-way messages sent, labelled by kind (publish or send)"
    );
    describe_counter!(
        "event_bus_messages_consumed_total",
        "Total number of deliveries handed to consumers"
    );
    describe_counter!(
        "event_bus_unroutable_total",
        "Total number of one-way messages with no consumer"
    );
    describe_counter!(
        "event_bus_interceptor_aborts_total",
        "Total number of deliveries aborted by an interceptor, labelled by direction"
    );

    describe_counter!(
        "event_bus_requests_started_total",
        "Total number of requests issued"
    );
    describe_counter!(
        "event_bus_requests_completed_total",
        "Total number of requests that received a reply"
    );
    describe_counter!(
        "event_bus_requests_timed_out_total",
        "Total number of requests that timed out"
    );
    describe_counter!(
        "event_bus_requests_failed_total",
        "Total number of requests that failed for any other reason"
    );
    describe_counter!(
        "event_bus_late_replies_total",
        "Total number of replies or failures that arrived after the request completed"
    );
    describe_histogram!(
        "event_bus_request_duration_seconds",
        "Time from request to completion"
    );
    describe_gauge!(
        "event_bus_pending_requests",
        "Number of requests awaiting a reply"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let server = MetricsServer::new();
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new();
        server.start().unwrap();

        metrics::counter!("event_bus_requests_started_total").increment(1);
        metrics::gauge!("event_bus_pending_requests").set(3.0);

        // If this test runs after another test initialized the recorder,
        // handle might be None. That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("event_bus_requests_started_total"));
            assert!(rendered.contains("event_bus_pending_requests"));
        }
    }
}
