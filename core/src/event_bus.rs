//! Event bus abstraction: publish, point-to-point send, and request/reply.
//!
//! This module provides the [`EventBus`] trait together with the types that
//! travel through it. Implementations live elsewhere (the in-process
//! `LocalEventBus` in the runtime crate).
//!
//! # Flow of a request
//!
//! ```text
//!  caller task                                             consumer task
//! ┌─────────────────────────┐                             ┌─────────────────────────┐
//! │ request(ctx, "foo", …)  │                             │ inbound chain           │
//! │  1. pending entry       │                             │  (restores ctx entries) │
//! │  2. outbound chain      │── message + ctx snapshot ─▶ │ handler(Delivery)       │
//! │  3. pick one consumer   │                             │  delivery.reply(body)   │
//! │  4. await reply/timeout │◀──────── reply ──────────── │                         │
//! └─────────────────────────┘                             └─────────────────────────┘
//! ```
//!
//! # Delivery policy
//!
//! - `publish` delivers to **every** consumer registered on the address.
//! - `send` and `request` deliver to **exactly one** consumer, chosen by
//!   round-robin among the consumers of the address.
//!
//! Delivery is at-most-once per consumer. There are no retries; a caller that
//! wants to retry a timed-out request issues a new one.
//!
//! # Dyn Compatibility
//!
//! Like the rest of the workspace, the trait returns explicit
//! `Pin<Box<dyn Future>>` values instead of using `async fn`, so that it can
//! be used as `Arc<dyn EventBus>`.

use crate::context::Context;
use crate::interceptor::InterceptorChain;
use crate::message::{Headers, Message};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// An interceptor vetoed the operation; nothing was delivered
    #[error("Delivery to '{address}' aborted by interceptor '{interceptor}': {reason}")]
    Aborted {
        /// Address of the aborted message
        address: String,
        /// Name of the interceptor that aborted
        interceptor: String,
        /// Reason given by the interceptor
        reason: String,
    },

    /// No reply arrived before the request deadline
    #[error("No reply from '{address}' within {timeout:?}")]
    Timeout {
        /// Address the request was sent to
        address: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Nobody consumes the address, so no reply is possible
    #[error("No consumer registered for address '{address}'")]
    NoConsumer {
        /// The unroutable address
        address: String,
    },

    /// The consumer explicitly failed the request
    #[error("Consumer of '{address}' failed the request (code {code}): {message}")]
    RecipientFailure {
        /// Address the request was sent to
        address: String,
        /// Application-defined failure code
        code: i32,
        /// Failure description
        message: String,
    },

    /// The reply slot was dropped without an answer
    #[error("Reply channel closed before a reply was delivered")]
    ReplyChannelClosed,
}

impl BusError {
    /// Check whether this error is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check whether an interceptor aborted the operation.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Per-call delivery settings.
///
/// # Example
///
/// ```
/// use contextual_bus_core::event_bus::DeliveryOptions;
/// use std::time::Duration;
///
/// let options = DeliveryOptions::new()
///     .with_header("priority", "high")
///     .with_timeout(Duration::from_secs(2));
///
/// assert_eq!(options.timeout(), Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    headers: Headers,
    timeout: Option<Duration>,
}

impl DeliveryOptions {
    /// Default options: no extra headers, configured timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header to the outgoing message.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Replace the headers of the outgoing message.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Override the bus default reply timeout for this request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Headers to attach.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Reply timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Split into headers and timeout.
    #[must_use]
    pub fn into_parts(self) -> (Headers, Option<Duration>) {
        (self.headers, self.timeout)
    }
}

/// A message handed to a consumer, together with the consumer task's context
/// and the means to answer it.
pub struct Delivery {
    message: Message,
    context: Context,
    bus: Arc<dyn EventBus>,
}

impl Delivery {
    /// Bundle a delivered message. Called by bus implementations.
    #[must_use]
    pub fn new(message: Message, context: Context, bus: Arc<dyn EventBus>) -> Self {
        Self {
            message,
            context,
            bus,
        }
    }

    /// The delivered envelope (after the inbound chain).
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Body of the delivered message.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        self.message.body()
    }

    /// Headers of the delivered message.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        self.message.headers()
    }

    /// This consumer invocation's context.
    ///
    /// It is a fork: writes here are invisible to the sender.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Answer the message. See [`EventBus::reply`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Aborted`] if an outbound interceptor vetoes the reply.
    pub fn reply(&self, body: impl Into<Bytes>) -> Result<(), BusError> {
        self.reply_with_options(body, DeliveryOptions::default())
    }

    /// Answer the message with extra headers.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Aborted`] if an outbound interceptor vetoes the reply.
    pub fn reply_with_options(
        &self,
        body: impl Into<Bytes>,
        options: DeliveryOptions,
    ) -> Result<(), BusError> {
        self.bus
            .reply(&self.context, &self.message, body.into(), options)
    }

    /// Fail the request so the caller observes [`BusError::RecipientFailure`].
    ///
    /// The failure travels the reply path: both interceptor chains see it as
    /// a [`DeliveryKind::Reply`](crate::DeliveryKind::Reply) message whose
    /// body is `message` and whose
    /// [`keys::FAILURE_CODE`](crate::keys::FAILURE_CODE) header is `code`.
    pub fn fail(&self, code: i32, message: impl Into<String>) {
        self.bus
            .fail(&self.context, &self.message, code, message.into());
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Boxed future returned by consumer handlers.
pub type ConsumerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler invoked once per delivered message.
///
/// Implemented for every `Fn(Delivery) -> impl Future<Output = ()>` closure.
///
/// # Example
///
/// ```rust,ignore
/// bus.local_consumer("foo", Arc::new(|delivery: Delivery| async move {
///     let trace_id = delivery.context().get_or_default("trace.id", "-");
///     tracing::info!(%trace_id, "Event consumer");
///     let _ = delivery.reply("world");
/// }));
/// ```
pub trait Consumer: Send + Sync {
    /// Handle one delivery.
    fn handle(&self, delivery: Delivery) -> ConsumerFuture;
}

impl<F, Fut> Consumer for F
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, delivery: Delivery) -> ConsumerFuture {
        Box::pin(self(delivery))
    }
}

/// Receipt for a consumer registration, used to unregister it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerRegistration {
    address: String,
    id: u64,
}

impl ConsumerRegistration {
    /// Create a receipt. Called by bus implementations.
    #[must_use]
    pub fn new(address: impl Into<String>, id: u64) -> Self {
        Self {
            address: address.into(),
            id,
        }
    }

    /// Address the consumer listens on.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Implementation-assigned consumer id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Future returned by [`EventBus::request`].
pub type ReplyFuture<'a> = Pin<Box<dyn Future<Output = Result<Message, BusError>> + Send + 'a>>;

/// Addressable messaging with interceptors and task-context propagation.
///
/// Every sending operation takes the caller's [`Context`]. The outbound chain
/// runs against it before the call returns, and consumers receive a fork of it
/// (captured right after the outbound chain) that the inbound chain can then
/// enrich.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the bus is shared between request
/// handlers and consumers running on different worker threads.
pub trait EventBus: Send + Sync {
    /// Deliver `body` to every consumer of `address`. Fire-and-forget: aborted
    /// or unroutable publishes are logged, not reported.
    fn publish(&self, context: &Context, address: &str, body: Bytes, options: DeliveryOptions);

    /// Deliver `body` to one consumer of `address` without expecting a reply.
    fn send(&self, context: &Context, address: &str, body: Bytes, options: DeliveryOptions);

    /// Deliver `body` to one consumer of `address` and await its reply.
    ///
    /// The outbound chain and consumer selection happen before this method
    /// returns; the returned future only waits for the reply.
    ///
    /// # Errors
    ///
    /// The future resolves to:
    /// - [`BusError::Aborted`] if an interceptor vetoes the request or its reply
    /// - [`BusError::NoConsumer`] if nobody listens on `address`
    /// - [`BusError::Timeout`] if no reply arrives before the deadline
    /// - [`BusError::RecipientFailure`] if the consumer calls [`Delivery::fail`]
    fn request(
        &self,
        context: &Context,
        address: &str,
        body: Bytes,
        options: DeliveryOptions,
    ) -> ReplyFuture<'_>;

    /// Send `body` to the reply address of `original` and resolve the waiting
    /// request. Replying to a message without a reply address, or to a request
    /// that already timed out, is a logged no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Aborted`] if an outbound interceptor vetoes the reply
    /// (the waiting request then fails with the same error).
    fn reply(
        &self,
        context: &Context,
        original: &Message,
        body: Bytes,
        options: DeliveryOptions,
    ) -> Result<(), BusError>;

    /// Fail the request `original` belongs to with a recipient failure.
    ///
    /// The failure runs the outbound chain in `context` and the inbound chain
    /// in the requester's context, like a reply. If either chain aborts, the
    /// request fails with [`BusError::Aborted`] instead. Failing a message
    /// without a reply address, or a completed request, is a logged no-op.
    fn fail(&self, context: &Context, original: &Message, code: i32, message: String);

    /// Register `consumer` on `address`.
    fn local_consumer(&self, address: &str, consumer: Arc<dyn Consumer>) -> ConsumerRegistration;

    /// Remove a consumer. Returns `false` if it was not registered.
    fn unregister_consumer(&self, registration: &ConsumerRegistration) -> bool;

    /// The interceptor chains of this bus.
    fn interceptors(&self) -> &InterceptorChain;
}
