//! Axum integration for the contextual event bus.
//!
//! HTTP is the outer protocol of the request adapter: headers are the
//! inbound trigger and the axum response is the outbound sink.
//!
//! # Request Flow
//!
//! 1. **Bind** a fresh context from the `TRACE-ID` header ([`middleware`])
//! 2. **Extract** it in the handler with [`RequestContext`]
//! 3. **Dispatch** a bus request through [`RequestContextAdapter`]
//! 4. **Complete** the [`ResponseSink`] with the reply or the failure
//!
//! # Example
//!
//! ```ignore
//! use contextual_bus_runtime::{AdapterConfig, ContextPropagation, LocalEventBus};
//! use contextual_bus_web::{router, AppState};
//!
//! let bus = LocalEventBus::new();
//! ContextPropagation::trace_id().install(bus.interceptors());
//! bus.consumer("foo", |delivery| async move {
//!     let _ = delivery.reply("world");
//! });
//!
//! let app = router(AppState::new(bus, AdapterConfig::default()));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```
//!
//! [`RequestContextAdapter`]: contextual_bus_runtime::RequestContextAdapter

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod sink;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{HttpHeaders, RequestContext};
pub use middleware::{trace_context_layer, RequestContextExt, TraceContextLayer};
pub use router::router;
pub use sink::ResponseSink;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
