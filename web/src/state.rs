//! Application state for Axum handlers.

use contextual_bus_runtime::{
    metrics::MetricsServer, AdapterConfig, LocalEventBus, RequestContextAdapter,
};
use std::fmt;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// # Examples
///
/// ```ignore
/// use contextual_bus_runtime::{AdapterConfig, LocalEventBus};
/// use contextual_bus_web::{router, AppState};
///
/// let bus = LocalEventBus::new();
/// let app = router(AppState::new(bus, AdapterConfig::default()));
/// ```
#[derive(Clone)]
pub struct AppState {
    bus: LocalEventBus,
    adapter: RequestContextAdapter,
    metrics: Option<Arc<MetricsServer>>,
}

impl AppState {
    /// Create state whose adapter dispatches through `bus`.
    #[must_use]
    pub fn new(bus: LocalEventBus, config: AdapterConfig) -> Self {
        let adapter = RequestContextAdapter::new(Arc::new(bus.clone()), config);
        Self {
            bus,
            adapter,
            metrics: None,
        }
    }

    /// Serve `/metrics` from an installed exporter.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsServer>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The bus behind the adapter.
    #[must_use]
    pub const fn bus(&self) -> &LocalEventBus {
        &self.bus
    }

    /// Adapter bridging HTTP requests onto the bus.
    #[must_use]
    pub const fn adapter(&self) -> &RequestContextAdapter {
        &self.adapter
    }

    /// Metrics exporter, when one was configured.
    #[must_use]
    pub fn metrics(&self) -> Option<&MetricsServer> {
        self.metrics.as_deref()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("bus", &self.bus)
            .field("adapter", &self.adapter)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
