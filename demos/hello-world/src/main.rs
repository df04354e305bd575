//! Hello world HTTP server.
//!
//! An HTTP `TRACE-ID` header travels with a bus request to the `foo`
//! consumer, which logs it and replies `world`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin hello-world
//! ```
//!
//! Optional environment:
//!
//! - `HELLO_CONFIG`: TOML file with `[bus]` and `[adapter]` tables
//! - `HELLO_LISTEN_ADDR`: listen address (default `0.0.0.0:8080`)
//! - `RUST_LOG`: log filter (default `info`)
//!
//! # Example Requests
//!
//! ```bash
//! curl -H "TRACE-ID: abc123" http://localhost:8080/hello
//! # Hello world!
//! # server log: Event consumer trace_id=abc123
//!
//! curl http://localhost:8080/health/ready
//! curl http://localhost:8080/metrics
//! ```
//!
//! # Configuration file
//!
//! ```toml
//! [bus]
//! default_timeout_ms = 5000
//! consumer_context = "fresh"
//!
//! [adapter]
//! inbound_header = "X-Request-Id"
//! ```

use anyhow::Context as _;
use contextual_bus_core::{keys, EventBus};
use contextual_bus_runtime::{
    metrics::MetricsServer, AdapterConfig, BusConfig, ContextPropagation, LocalEventBus,
};
use contextual_bus_web::{handlers::HELLO_ADDRESS, router, AppState};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Contents of the `HELLO_CONFIG` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DemoConfig {
    bus: BusConfig,
    adapter: AdapterConfig,
}

impl DemoConfig {
    fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.bus.validate()?;
        Ok(config)
    }

    fn from_env() -> anyhow::Result<Self> {
        let Ok(path) = std::env::var("HELLO_CONFIG") else {
            return Ok(Self::default());
        };
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        Self::from_toml_str(&source).with_context(|| format!("Invalid config file {path}"))
    }
}

/// The `foo` consumer: logs the propagated trace id and replies `world`.
fn register_hello_consumer(bus: &LocalEventBus) {
    bus.consumer(HELLO_ADDRESS, |delivery| async move {
        let trace_id = delivery.context().get_or_default(keys::TRACE_ID, "-");
        info!(trace_id = %trace_id, "Event consumer");
        if let Err(err) = delivery.reply("world") {
            warn!(error = %err, "Reply rejected");
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("=== Hello World Server ===");

    let config = DemoConfig::from_env()?;
    let bus = LocalEventBus::with_config(config.bus);
    ContextPropagation::trace_id().install(bus.interceptors());
    register_hello_consumer(&bus);

    let mut metrics = MetricsServer::new();
    metrics.start()?;

    let state = AppState::new(bus, config.adapter).with_metrics(Arc::new(metrics));
    let app = router(state);

    let addr =
        std::env::var("HELLO_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on {addr}");
    println!("http://localhost:{}/", listener.local_addr()?.port());

    axum::serve(listener, app).await?;
    Ok(())
}
