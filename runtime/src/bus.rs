//! In-process event bus.
//!
//! [`LocalEventBus`] routes messages between consumers registered in the same
//! process. Each delivery runs as its own Tokio task, so a bus must be used
//! from within a Tokio runtime.
//!
//! # Request lifecycle
//!
//! ```text
//! request()                               consumer task
//!   pending.insert(reply addr)
//!   outbound chain (requester ctx)
//!   pick consumer, spawn ─────────────▶  inbound chain (consumer ctx)
//!   return future                        handler ── reply() ──┐
//!                                                             │ outbound chain (replier ctx)
//!   future ◀── slot ◀── inbound chain (origin ctx) ◀── pending.take(reply addr)
//! ```
//!
//! The deadline is fixed when `request` is called, not when the future is
//! first polled. The timeout removes the pending entry the same way a reply
//! does. Whichever side removes it completes the request, so a request
//! finishes exactly once; a reply that claims an entry past its deadline
//! completes it with [`BusError::Timeout`].

use crate::config::{BusConfig, ConsumerContext};
use crate::pending::{PendingGuard, PendingRequest, PendingRequests};
use crate::registry::ConsumerRegistry;
use crate::HealthCheck;
use bytes::Bytes;
use contextual_bus_core::{
    keys, BusError, Consumer, ConsumerRegistration, Context, Delivery, DeliveryKind, DeliveryOptions,
    Direction, EventBus, InterceptorChain, Message, ReplyFuture,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Prefix of the unique addresses replies are routed to.
pub const REPLY_ADDRESS_PREFIX: &str = "__bus.reply.";

/// In-process [`EventBus`].
///
/// Cheap to clone; clones share consumers, interceptors, and pending
/// requests.
///
/// # Example
///
/// ```
/// use contextual_bus_core::{Context, DeliveryOptions, EventBus};
/// use contextual_bus_runtime::LocalEventBus;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = LocalEventBus::new();
/// bus.consumer("foo", |delivery| async move {
///     let _ = delivery.reply("world");
/// });
///
/// let reply = bus
///     .request(&Context::new(), "foo", "bar".into(), DeliveryOptions::new())
///     .await?;
/// assert_eq!(reply.body_str(), Some("world"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<Inner>,
}

struct Inner {
    config: BusConfig,
    interceptors: InterceptorChain,
    consumers: ConsumerRegistry,
    pending: Arc<PendingRequests>,
}

impl LocalEventBus {
    /// Create a bus with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with `config`.
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                interceptors: InterceptorChain::new(),
                consumers: ConsumerRegistry::default(),
                pending: Arc::new(PendingRequests::default()),
            }),
        }
    }

    /// The configuration this bus was built with.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Register a closure as a consumer of `address`.
    pub fn consumer<F, Fut>(&self, address: &str, handler: F) -> ConsumerRegistration
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.local_consumer(address, Arc::new(handler))
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of consumers registered on `address`.
    #[must_use]
    pub fn consumer_count(&self, address: &str) -> usize {
        self.inner.consumers.count(address)
    }

    /// Perform a health check on the bus.
    ///
    /// Degraded once the number of in-flight requests reaches the configured
    /// threshold.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let pending = self.inner.pending.len();
        let overdue = self.inner.pending.overdue(Instant::now());
        let threshold = self.inner.config.pending_degraded_threshold;

        let check = if pending >= threshold {
            HealthCheck::degraded(
                "event_bus",
                format!("{pending} requests awaiting replies (threshold {threshold})"),
            )
        } else {
            HealthCheck::healthy("event_bus")
        };

        check
            .with_metadata("pending_requests", pending.to_string())
            .with_metadata("overdue_requests", overdue.to_string())
            .with_metadata("addresses", self.inner.consumers.address_count().to_string())
    }

    fn handle(&self) -> Arc<dyn EventBus> {
        Arc::new(self.clone())
    }

    fn run_outbound(
        &self,
        context: &Context,
        kind: DeliveryKind,
        message: Message,
    ) -> Result<Message, BusError> {
        self.inner
            .interceptors
            .run(Direction::Outbound, kind, message, context)
            .inspect_err(|err| {
                metrics::counter!("event_bus_interceptor_aborts_total", "direction" => "outbound")
                    .increment(1);
                tracing::debug!(kind = %kind, error = %err, "Outbound chain aborted delivery");
            })
    }

    fn consumer_context(&self, snapshot: &Context) -> Context {
        match self.inner.config.consumer_context {
            ConsumerContext::InheritSender => snapshot.fork(),
            ConsumerContext::Fresh => Context::new(),
        }
    }

    /// Run the inbound chain and the consumer on a task of their own.
    fn dispatch(
        &self,
        (consumer_id, consumer): (u64, Arc<dyn Consumer>),
        message: Message,
        context: Context,
        kind: DeliveryKind,
    ) {
        let bus = self.clone();
        let span = tracing::info_span!(
            "bus_consumer",
            address = %message.address(),
            kind = %kind,
            consumer_id
        );

        tokio::spawn(
            async move {
                let reply_address = message.reply_address().map(str::to_string);
                let message = match bus.inner.interceptors.run(
                    Direction::Inbound,
                    kind,
                    message,
                    &context,
                ) {
                    Ok(message) => message,
                    Err(err) => {
                        metrics::counter!(
                            "event_bus_interceptor_aborts_total",
                            "direction" => "inbound"
                        )
                        .increment(1);
                        tracing::debug!(error = %err, "Inbound chain aborted delivery");

                        if kind == DeliveryKind::Request {
                            if let Some(request) = reply_address
                                .as_deref()
                                .and_then(|address| bus.inner.pending.take(address))
                            {
                                request.resolve(Err(err));
                            }
                        }
                        return;
                    }
                };

                metrics::counter!("event_bus_messages_consumed_total").increment(1);
                let delivery = Delivery::new(message, context, bus.handle());
                consumer.handle(delivery).await;
            }
            .instrument(span),
        );
    }

    fn deliver_one_way(
        &self,
        context: &Context,
        address: &str,
        body: Bytes,
        options: DeliveryOptions,
        kind: DeliveryKind,
    ) {
        let (headers, _) = options.into_parts();
        let message = Message::new(address, body).with_headers(headers);
        let Ok(message) = self.run_outbound(context, kind, message) else {
            return;
        };
        let snapshot = context.fork();

        if kind == DeliveryKind::Publish {
            let consumers = self.inner.consumers.all(address);
            if consumers.is_empty() {
                metrics::counter!("event_bus_unroutable_total").increment(1);
                tracing::debug!(address, "Published message has no consumers");
            }
            for consumer in consumers {
                self.dispatch(
                    consumer,
                    message.clone(),
                    self.consumer_context(&snapshot),
                    kind,
                );
            }
        } else if let Some(consumer) = self.inner.consumers.next(address) {
            self.dispatch(consumer, message, self.consumer_context(&snapshot), kind);
        } else {
            metrics::counter!("event_bus_unroutable_total").increment(1);
            tracing::debug!(address, "Sent message has no consumer");
        }
    }
}

/// Complete a request whose reply came in after its deadline.
fn expire_late(request: PendingRequest, reply_address: &str) {
    metrics::counter!("event_bus_late_replies_total").increment(1);
    tracing::debug!(
        reply_address,
        correlation_id = %request.correlation_id,
        "Reply arrived after the request deadline"
    );
    request.expire();
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEventBus")
            .field("config", &self.inner.config)
            .field("interceptors", &self.inner.interceptors)
            .field("pending_requests", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl EventBus for LocalEventBus {
    fn publish(&self, context: &Context, address: &str, body: Bytes, options: DeliveryOptions) {
        metrics::counter!("event_bus_messages_published_total", "kind" => "publish").increment(1);
        self.deliver_one_way(context, address, body, options, DeliveryKind::Publish);
    }

    fn send(&self, context: &Context, address: &str, body: Bytes, options: DeliveryOptions) {
        metrics::counter!("event_bus_messages_published_total", "kind" => "send").increment(1);
        self.deliver_one_way(context, address, body, options, DeliveryKind::Send);
    }

    fn request(
        &self,
        context: &Context,
        address: &str,
        body: Bytes,
        options: DeliveryOptions,
    ) -> ReplyFuture<'_> {
        metrics::counter!("event_bus_requests_started_total").increment(1);

        let (headers, timeout) = options.into_parts();
        let timeout = timeout.unwrap_or_else(|| self.inner.config.default_timeout());
        let correlation_id = Uuid::new_v4();
        let reply_address = format!("{REPLY_ADDRESS_PREFIX}{correlation_id}");
        let started = Instant::now();
        let deadline = started + timeout;

        // The entry must exist before the consumer can possibly reply.
        let (slot, mut receiver) = oneshot::channel();
        self.inner.pending.insert(
            reply_address.clone(),
            PendingRequest::new(
                correlation_id,
                address.to_string(),
                timeout,
                deadline,
                context.fork(),
                slot,
            ),
        );
        let guard = PendingGuard::new(Arc::clone(&self.inner.pending), reply_address.clone());

        let message = Message::new(address, body)
            .with_headers(headers)
            .with_reply_address(reply_address.clone());
        let routed = self
            .run_outbound(context, DeliveryKind::Request, message)
            .and_then(|message| {
                let consumer = self.inner.consumers.next(address).ok_or_else(|| {
                    BusError::NoConsumer {
                        address: address.to_string(),
                    }
                })?;
                let snapshot = context.fork();
                self.dispatch(
                    consumer,
                    message,
                    self.consumer_context(&snapshot),
                    DeliveryKind::Request,
                );
                Ok(())
            });

        if let Err(err) = routed {
            self.inner.pending.take(&reply_address);
            metrics::counter!("event_bus_requests_failed_total").increment(1);
            tracing::debug!(address, error = %err, "Request failed before dispatch");
            return Box::pin(std::future::ready(Err(err)));
        }

        let address = address.to_string();
        let pending = Arc::clone(&self.inner.pending);
        Box::pin(async move {
            let _guard = guard;
            let result = match tokio::time::timeout_at(deadline, &mut receiver).await {
                Ok(received) => received.unwrap_or(Err(BusError::ReplyChannelClosed)),
                Err(_elapsed) => {
                    if pending.take(&reply_address).is_some() {
                        tracing::warn!(
                            %correlation_id,
                            address = %address,
                            ?timeout,
                            "Request timed out"
                        );
                        Err(BusError::Timeout { address, timeout })
                    } else {
                        // A reply claimed the entry at the deadline and is in flight.
                        receiver.await.unwrap_or(Err(BusError::ReplyChannelClosed))
                    }
                }
            };

            metrics::histogram!("event_bus_request_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            match &result {
                Ok(_) => metrics::counter!("event_bus_requests_completed_total").increment(1),
                Err(BusError::Timeout { .. }) => {
                    metrics::counter!("event_bus_requests_timed_out_total").increment(1);
                }
                Err(_) => metrics::counter!("event_bus_requests_failed_total").increment(1),
            }
            result
        })
    }

    fn reply(
        &self,
        context: &Context,
        original: &Message,
        body: Bytes,
        options: DeliveryOptions,
    ) -> Result<(), BusError> {
        let Some(reply_address) = original.reply_address() else {
            tracing::debug!(
                address = %original.address(),
                "Reply ignored: message expects no reply"
            );
            return Ok(());
        };

        let (headers, _) = options.into_parts();
        let message = Message::new(reply_address, body).with_headers(headers);
        let message = match self.run_outbound(context, DeliveryKind::Reply, message) {
            Ok(message) => message,
            Err(err) => {
                if let Some(request) = self.inner.pending.take(reply_address) {
                    request.resolve(Err(err.clone()));
                }
                return Err(err);
            }
        };

        let Some(request) = self.inner.pending.take(reply_address) else {
            metrics::counter!("event_bus_late_replies_total").increment(1);
            tracing::debug!(reply_address, "Reply arrived after the request completed");
            return Ok(());
        };
        if request.is_overdue(Instant::now()) {
            expire_late(request, reply_address);
            return Ok(());
        }

        let result = self
            .inner
            .interceptors
            .run(Direction::Inbound, DeliveryKind::Reply, message, &request.origin)
            .inspect_err(|err| {
                metrics::counter!("event_bus_interceptor_aborts_total", "direction" => "inbound")
                    .increment(1);
                tracing::debug!(error = %err, "Inbound chain aborted reply");
            });

        if !request.resolve(result) {
            tracing::debug!(reply_address, "Requester stopped waiting before the reply");
        }
        Ok(())
    }

    fn fail(&self, context: &Context, original: &Message, code: i32, message: String) {
        let Some(reply_address) = original.reply_address() else {
            tracing::debug!(
                address = %original.address(),
                code,
                "Failure ignored: message expects no reply"
            );
            return;
        };

        let failure = Message::new(reply_address, message.clone())
            .with_header(keys::FAILURE_CODE, code.to_string());
        let failure = match self.run_outbound(context, DeliveryKind::Reply, failure) {
            Ok(failure) => failure,
            Err(err) => {
                if let Some(request) = self.inner.pending.take(reply_address) {
                    request.resolve(Err(err));
                }
                return;
            }
        };

        let Some(request) = self.inner.pending.take(reply_address) else {
            metrics::counter!("event_bus_late_replies_total").increment(1);
            tracing::debug!(reply_address, code, "Failure arrived after the request completed");
            return;
        };
        if request.is_overdue(Instant::now()) {
            expire_late(request, reply_address);
            return;
        }

        tracing::debug!(
            correlation_id = %request.correlation_id,
            code,
            "Consumer failed the request"
        );
        let err = match self.inner.interceptors.run(
            Direction::Inbound,
            DeliveryKind::Reply,
            failure,
            &request.origin,
        ) {
            Ok(_) => BusError::RecipientFailure {
                address: request.address.clone(),
                code,
                message,
            },
            Err(err) => {
                metrics::counter!("event_bus_interceptor_aborts_total", "direction" => "inbound")
                    .increment(1);
                tracing::debug!(error = %err, "Inbound chain aborted failure");
                err
            }
        };
        request.resolve(Err(err));
    }

    fn local_consumer(&self, address: &str, consumer: Arc<dyn Consumer>) -> ConsumerRegistration {
        let id = self.inner.consumers.register(address, consumer);
        tracing::debug!(address, consumer_id = id, "Consumer registered");
        ConsumerRegistration::new(address, id)
    }

    fn unregister_consumer(&self, registration: &ConsumerRegistration) -> bool {
        let removed = self
            .inner
            .consumers
            .unregister(registration.address(), registration.id());
        if removed {
            tracing::debug!(
                address = registration.address(),
                consumer_id = registration.id(),
                "Consumer unregistered"
            );
        }
        removed
    }

    fn interceptors(&self) -> &InterceptorChain {
        &self.inner.interceptors
    }
}
