//! Protocol-agnostic request adapter.
//!
//! The adapter is the seam between an external protocol (HTTP in the `web`
//! crate, a test harness in `testing`) and the bus. For every inbound trigger
//! it walks the same stages:
//!
//! ```text
//! Received ─▶ ContextPopulated ─▶ Dispatched ─▶ Replied ─▶ SinkWritten ─▶ Done
//!     │               │                │            │            │
//!     └───────────────┴────────────────┴────────────┴────────────┴──▶ Failed
//! ```
//!
//! Every failure is written to the sink as a failure response. A sink that
//! rejects the write surfaces as [`AdapterError::SinkWriteFailure`].

use bytes::Bytes;
use contextual_bus_core::{keys, BusError, Context, DeliveryOptions, EventBus, Headers, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;
use thiserror::Error;

/// Read access to the headers of an inbound protocol request.
pub trait InboundTrigger {
    /// First value of header `name`, compared case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;
}

impl<S: BuildHasher> InboundTrigger for HashMap<String, String, S> {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str).or_else(|| {
            self.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }
}

impl InboundTrigger for Headers {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

/// A sink refused a write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sink rejected write: {reason}")]
pub struct SinkError {
    reason: String,
}

impl SinkError {
    /// Create a sink error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the write was refused.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Where the adapter writes the outcome of a request.
pub trait OutboundSink {
    /// Write a successful response body.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the sink cannot accept the body.
    fn write_body(&mut self, body: Bytes) -> Result<(), SinkError>;

    /// Write a failure response.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the sink cannot accept the failure.
    fn write_failure(&mut self, failure: &AdapterError) -> Result<(), SinkError>;
}

/// Errors produced while adapting a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The bus request failed
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The sink rejected the response
    #[error("Failed to write response: {0}")]
    SinkWriteFailure(#[from] SinkError),
}

/// Failure classes an outer protocol layer maps to its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// An interceptor vetoed the request or its reply
    Aborted,
    /// No reply before the deadline
    Timeout,
    /// Nobody consumes the address
    NoConsumer,
    /// The consumer failed the request
    RecipientFailure,
    /// The reply slot closed unanswered
    ReplyChannelClosed,
    /// The sink rejected the response
    SinkWriteFailure,
}

impl AdapterError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Bus(BusError::Aborted { .. }) => FailureKind::Aborted,
            Self::Bus(BusError::Timeout { .. }) => FailureKind::Timeout,
            Self::Bus(BusError::NoConsumer { .. }) => FailureKind::NoConsumer,
            Self::Bus(BusError::RecipientFailure { .. }) => FailureKind::RecipientFailure,
            Self::Bus(BusError::ReplyChannelClosed) => FailureKind::ReplyChannelClosed,
            Self::SinkWriteFailure(_) => FailureKind::SinkWriteFailure,
        }
    }
}

/// Stages of one adapted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Trigger accepted
    Received,
    /// Context bound from the trigger
    ContextPopulated,
    /// Request handed to the bus
    Dispatched,
    /// Reply received
    Replied,
    /// Response written to the sink
    SinkWritten,
    /// Finished successfully
    Done,
    /// Finished with a failure
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::ContextPopulated => "context_populated",
            Self::Dispatched => "dispatched",
            Self::Replied => "replied",
            Self::SinkWritten => "sink_written",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which inbound header feeds which context key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterConfig {
    /// Protocol header carrying the value
    pub inbound_header: String,
    /// Context key the value is stored under
    pub context_key: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            inbound_header: keys::TRACE_ID_HEADER.to_string(),
            context_key: keys::TRACE_ID.to_string(),
        }
    }
}

impl AdapterConfig {
    /// Default mapping: `TRACE-ID` header to `trace.id`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound header name.
    #[must_use]
    pub fn with_inbound_header(mut self, header: impl Into<String>) -> Self {
        self.inbound_header = header.into();
        self
    }

    /// Set the context key.
    #[must_use]
    pub fn with_context_key(mut self, key: impl Into<String>) -> Self {
        self.context_key = key.into();
        self
    }
}

/// Create a fresh context for `trigger`, holding the configured header value
/// when it is present and non-empty.
#[must_use]
pub fn bind_context<T>(config: &AdapterConfig, trigger: &T) -> Context
where
    T: InboundTrigger + ?Sized,
{
    let context = Context::new();
    if let Some(value) = trigger
        .header(&config.inbound_header)
        .filter(|value| !value.is_empty())
    {
        context.put(config.context_key.as_str(), value);
    }
    context
}

/// Bridges inbound protocol requests to bus requests.
#[derive(Clone)]
pub struct RequestContextAdapter {
    bus: Arc<dyn EventBus>,
    config: AdapterConfig,
}

impl RequestContextAdapter {
    /// Create an adapter sending through `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, config: AdapterConfig) -> Self {
        Self { bus, config }
    }

    /// Header mapping in use.
    #[must_use]
    pub const fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Bind a fresh context for one inbound request.
    #[must_use]
    pub fn bind<T>(&self, trigger: &T) -> Context
    where
        T: InboundTrigger + ?Sized,
    {
        let context = bind_context(&self.config, trigger);
        tracing::debug!(
            stage = %Stage::ContextPopulated,
            key = %self.config.context_key,
            value = context.get(&self.config.context_key).as_deref().unwrap_or("-"),
            "Bound request context"
        );
        context
    }

    /// Request `address` on the bus within `context`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Bus`] with the bus failure.
    pub async fn dispatch(
        &self,
        context: &Context,
        address: &str,
        body: impl Into<Bytes>,
    ) -> Result<Message, AdapterError> {
        self.dispatch_with_options(context, address, body, DeliveryOptions::default())
            .await
    }

    /// Like [`RequestContextAdapter::dispatch`] with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Bus`] with the bus failure.
    pub async fn dispatch_with_options(
        &self,
        context: &Context,
        address: &str,
        body: impl Into<Bytes>,
        options: DeliveryOptions,
    ) -> Result<Message, AdapterError> {
        tracing::debug!(stage = %Stage::Dispatched, address, "Dispatching request");
        let reply = self
            .bus
            .request(context, address, body.into(), options)
            .await?;
        tracing::debug!(stage = %Stage::Replied, address, "Reply received");
        Ok(reply)
    }

    /// Write `outcome` to `sink`.
    ///
    /// # Errors
    ///
    /// Returns the failure carried by `outcome` once it has been written to
    /// the sink, or [`AdapterError::SinkWriteFailure`] if the sink rejected a
    /// write.
    pub fn complete<S>(
        &self,
        sink: &mut S,
        outcome: Result<Bytes, AdapterError>,
    ) -> Result<(), AdapterError>
    where
        S: OutboundSink + ?Sized,
    {
        let failure = match outcome {
            Ok(body) => match sink.write_body(body) {
                Ok(()) => {
                    tracing::debug!(stage = %Stage::SinkWritten, "Response written");
                    tracing::debug!(stage = %Stage::Done, "Request complete");
                    return Ok(());
                }
                Err(err) => AdapterError::SinkWriteFailure(err),
            },
            Err(err) => err,
        };

        tracing::debug!(stage = %Stage::Failed, kind = ?failure.kind(), error = %failure, "Request failed");
        match sink.write_failure(&failure) {
            Ok(()) => Err(failure),
            Err(sink_err) => {
                tracing::warn!(error = %sink_err, "Sink rejected failure response");
                Err(AdapterError::SinkWriteFailure(sink_err))
            }
        }
    }

    /// Run one inbound request through every stage.
    ///
    /// `render` turns the reply into the response body.
    ///
    /// # Errors
    ///
    /// See [`RequestContextAdapter::complete`].
    pub async fn handle<T, S, R>(
        &self,
        trigger: &T,
        sink: &mut S,
        address: &str,
        body: impl Into<Bytes>,
        render: R,
    ) -> Result<(), AdapterError>
    where
        T: InboundTrigger + ?Sized,
        S: OutboundSink + ?Sized,
        R: FnOnce(&Message) -> Bytes,
    {
        tracing::debug!(stage = %Stage::Received, address, "Inbound request");
        let context = self.bind(trigger);
        let outcome = self
            .dispatch(&context, address, body)
            .await
            .map(|reply| render(&reply));
        self.complete(sink, outcome)
    }
}

impl fmt::Debug for RequestContextAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContextAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
