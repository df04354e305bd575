//! # Contextual Bus Core
//!
//! Core types for an in-process event bus whose messages carry task context
//! (for example a trace id) across asynchronous hops.
//!
//! ## Core Concepts
//!
//! - **Context**: task-scoped key/value entries, passed explicitly and forked
//!   for child tasks
//! - **Message**: immutable envelope (address, body, headers, reply address)
//! - **Interceptor**: ordered inbound/outbound pipeline stage that can edit
//!   headers or abort delivery
//! - **EventBus**: publish, send, and request/reply between local consumers
//!
//! ## Propagation in one picture
//!
//! ```text
//! HTTP "TRACE-ID: abc"            outbound chain                inbound chain
//!        │                 ctx["trace.id"] ─▶ header      header ─▶ consumer ctx
//!        ▼                        │                              │
//!  Context{trace.id=abc} ── request("foo") ── message{trace.id} ──▶ consumer
//! ```
//!
//! ## Example
//!
//! ```
//! use contextual_bus_core::{Context, Interception, InterceptorChain, keys};
//!
//! let chain = InterceptorChain::new();
//! chain.add_outbound("propagate", |event| {
//!     if let Some(trace_id) = event.context().get(keys::TRACE_ID) {
//!         event.headers_mut().add(keys::TRACE_ID, trace_id);
//!     }
//!     Interception::Continue
//! });
//!
//! let context = Context::new();
//! context.put(keys::TRACE_ID, "abc123");
//! assert_eq!(chain.len(contextual_bus_core::Direction::Outbound), 1);
//! ```

pub mod context;
pub mod event_bus;
pub mod interceptor;
pub mod message;

/// Well-known context keys and header names.
pub mod keys {
    /// Context key and bus header carrying the trace id.
    pub const TRACE_ID: &str = "trace.id";

    /// External (HTTP) request header the trace id arrives in.
    pub const TRACE_ID_HEADER: &str = "TRACE-ID";

    /// Header carrying the failure code on a failed reply.
    pub const FAILURE_CODE: &str = "failure.code";
}

// Re-export commonly used types
pub use bytes::Bytes;
pub use context::Context;
pub use event_bus::{
    BusError, Consumer, ConsumerFuture, ConsumerRegistration, Delivery, DeliveryOptions, EventBus,
    ReplyFuture,
};
pub use interceptor::{
    DeliveryKind, Direction, FnInterceptor, Interception, InterceptionEvent, Interceptor,
    InterceptorChain, InterceptorId,
};
pub use message::{Headers, Message};
