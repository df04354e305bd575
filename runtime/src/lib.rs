//! # Contextual Bus Runtime
//!
//! Runtime implementation of the contextual event bus.
//!
//! ## Core Components
//!
//! - **`LocalEventBus`**: in-process bus with publish, send, and request/reply
//! - **`ContextPropagation`**: interceptor pair carrying context entries in
//!   message headers
//! - **`RequestContextAdapter`**: binds an inbound protocol request to a
//!   context, forwards it over the bus, and writes the reply to a sink
//! - **`BusConfig`**: timeouts and consumer context mode, loadable from TOML
//!
//! ## Example
//!
//! ```
//! use contextual_bus_core::{keys, Context, DeliveryOptions, EventBus};
//! use contextual_bus_runtime::{ContextPropagation, LocalEventBus};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = LocalEventBus::new();
//! ContextPropagation::trace_id().install(bus.interceptors());
//!
//! bus.consumer("foo", |delivery| async move {
//!     let trace_id = delivery.context().get_or_default(keys::TRACE_ID, "-");
//!     let _ = delivery.reply(format!("world ({trace_id})"));
//! });
//!
//! let context = Context::new();
//! context.put(keys::TRACE_ID, "abc123");
//! let reply = bus
//!     .request(&context, "foo", "bar".into(), DeliveryOptions::new())
//!     .await?;
//! assert_eq!(reply.body_str(), Some("world (abc123)"));
//! # Ok(())
//! # }
//! ```

/// Protocol-agnostic request adapter
pub mod adapter;

/// In-process event bus
pub mod bus;

/// Bus configuration
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

/// Context propagation interceptors
pub mod propagation;

mod pending;
mod registry;

pub use adapter::{
    bind_context, AdapterConfig, AdapterError, FailureKind, InboundTrigger, OutboundSink,
    RequestContextAdapter, SinkError, Stage,
};
pub use bus::{LocalEventBus, REPLY_ADDRESS_PREFIX};
pub use config::{BusConfig, ConfigError, ConsumerContext};
pub use propagation::ContextPropagation;

use serde::Serialize;

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but experiencing issues (e.g., many requests
    /// awaiting replies)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Optional metadata (e.g., pending request counts)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Check if overall system is degraded
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.status.is_degraded()
    }

    /// Check if overall system is unhealthy
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_ordering() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unhealthy);
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_health_check_metadata() {
        let check = HealthCheck::healthy("event_bus").with_metadata("pending_requests", "0");
        assert_eq!(check.status, HealthStatus::Healthy);
        assert_eq!(check.message, None);
        assert_eq!(check.metadata.len(), 1);
    }

    #[test]
    fn test_health_report_takes_worst_status() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("event_bus"),
            HealthCheck::degraded("listener", "Slow accepts"),
        ]);
        assert!(report.is_degraded());

        let report = HealthReport::new(vec![HealthCheck::unhealthy("event_bus", "Stopped")]);
        assert!(report.is_unhealthy());
        assert!(!report.is_healthy());
    }
}
