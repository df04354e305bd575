//! Ordered interceptor pipelines run around every bus operation.
//!
//! Each bus keeps two chains: the **outbound** chain runs inside the sender's
//! task before a message leaves it, and the **inbound** chain runs inside the
//! receiving task before the consumer handler sees the message.
//!
//! ```text
//!   sender task                                      consumer task
//!  ┌────────────┐   ┌──────────────────────┐        ┌─────────────────────┐   ┌──────────┐
//!  │ request()  │──▶│ outbound: A ─▶ B ─▶ …│──────▶ │ inbound: C ─▶ D ─▶ …│──▶│ handler  │
//!  └────────────┘   └──────────────────────┘        └─────────────────────┘   └──────────┘
//!                          │ Abort                           │ Abort
//!                          ▼                                 ▼
//!                   BusError::Aborted                 BusError::Aborted
//! ```
//!
//! Every interceptor returns an [`Interception`]: `Continue` hands the
//! (possibly edited) message to the next stage, `Abort` cancels the operation
//! and nothing is delivered. Because the outcome is a return value, an
//! interceptor cannot forget to continue. It can still block its task forever
//! (for example by waiting on a lock that is never released); the chain does
//! not guard against that, so interceptors must stay short and non-blocking.
//!
//! # Example
//!
//! ```
//! use contextual_bus_core::context::Context;
//! use contextual_bus_core::interceptor::{DeliveryKind, Direction, Interception, InterceptorChain};
//! use contextual_bus_core::message::Message;
//!
//! let chain = InterceptorChain::new();
//! chain.add_outbound("stamp", |event| {
//!     event.headers_mut().add("stamped", "yes");
//!     Interception::Continue
//! });
//!
//! let message = chain
//!     .run(Direction::Outbound, DeliveryKind::Send, Message::new("foo", "bar"), &Context::new())
//!     .unwrap();
//! assert_eq!(message.headers().get("stamped"), Some("yes"));
//! ```

use crate::context::Context;
use crate::event_bus::BusError;
use crate::message::{Headers, Message};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Which side of a hop a chain runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Runs in the receiving task, before the consumer handler.
    Inbound,
    /// Runs in the sending task, before the message is handed over.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// The bus operation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    /// Fan-out to every consumer of the address.
    Publish,
    /// Point-to-point, no reply expected.
    Send,
    /// Point-to-point, the sender awaits a reply.
    Request,
    /// Answer to a previous request.
    Reply,
}

impl fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => write!(f, "publish"),
            Self::Send => write!(f, "send"),
            Self::Request => write!(f, "request"),
            Self::Reply => write!(f, "reply"),
        }
    }
}

/// Outcome an interceptor hands back to the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Pass the message on to the next interceptor (or the bus operation).
    Continue,
    /// Cancel the operation. No delivery happens.
    Abort {
        /// Human-readable reason, surfaced in [`BusError::Aborted`].
        reason: String,
    },
}

impl Interception {
    /// Shorthand for [`Interception::Abort`].
    #[must_use]
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort {
            reason: reason.into(),
        }
    }
}

/// What an interceptor sees: the current envelope plus the context of the
/// task the chain runs in.
///
/// On the outbound side the context is the sender's; on the inbound side it is
/// the receiving task's freshly forked context, so writes made here are
/// visible to the consumer handler and nowhere else.
pub struct InterceptionEvent<'a> {
    direction: Direction,
    kind: DeliveryKind,
    message: Message,
    context: &'a Context,
}

impl<'a> InterceptionEvent<'a> {
    /// Create an event. Chains build these internally; this is public for
    /// unit-testing interceptors in isolation.
    #[must_use]
    pub const fn new(
        direction: Direction,
        kind: DeliveryKind,
        message: Message,
        context: &'a Context,
    ) -> Self {
        Self {
            direction,
            kind,
            message,
            context,
        }
    }

    /// Direction of the chain currently running.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Bus operation the message belongs to.
    #[must_use]
    pub const fn kind(&self) -> DeliveryKind {
        self.kind
    }

    /// Current envelope, including edits made by earlier interceptors.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Current headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        self.message.headers()
    }

    /// Mutable headers of this chain's private copy of the envelope.
    pub fn headers_mut(&mut self) -> &mut Headers {
        self.message.headers_mut()
    }

    /// Context of the task the chain runs in.
    #[must_use]
    pub const fn context(&self) -> &'a Context {
        self.context
    }

    /// Swap in a new envelope for the remaining stages.
    pub fn replace_message(&mut self, message: Message) {
        self.message = message;
    }

    /// Take the envelope out of the event.
    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }
}

/// A pipeline stage.
///
/// Implementations must be quick and must not block; they run synchronously
/// inside the sending or receiving task.
pub trait Interceptor: Send + Sync {
    /// Inspect or edit the event, then decide whether the operation goes on.
    fn intercept(&self, event: &mut InterceptionEvent<'_>) -> Interception;

    /// Name used in logs and in [`BusError::Aborted`].
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapter turning a named closure into an [`Interceptor`].
pub struct FnInterceptor<F> {
    name: String,
    f: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&mut InterceptionEvent<'_>) -> Interception + Send + Sync,
{
    /// Wrap `f` under `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&mut InterceptionEvent<'_>) -> Interception + Send + Sync,
{
    fn intercept(&self, event: &mut InterceptionEvent<'_>) -> Interception {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handle returned by [`InterceptorChain::register`], used to remove an
/// interceptor again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

type Stage = (InterceptorId, Arc<dyn Interceptor>);

#[derive(Default)]
struct ChainInner {
    inbound: RwLock<Vec<Stage>>,
    outbound: RwLock<Vec<Stage>>,
    next_id: AtomicU64,
}

/// Inbound and outbound interceptor lists of one bus.
///
/// Clones share the same lists. Registration order is execution order, per
/// direction. [`InterceptorChain::run`] works on a snapshot of the list, so
/// an interceptor may register or remove stages while a chain is running;
/// the change applies from the next message on.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    inner: Arc<ChainInner>,
}

impl InterceptorChain {
    /// Create empty chains.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn stages(&self, direction: Direction) -> &RwLock<Vec<Stage>> {
        match direction {
            Direction::Inbound => &self.inner.inbound,
            Direction::Outbound => &self.inner.outbound,
        }
    }

    /// Append `interceptor` to the chain for `direction`.
    pub fn register<I>(&self, direction: Direction, interceptor: I) -> InterceptorId
    where
        I: Interceptor + 'static,
    {
        let id = InterceptorId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.stages(direction)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(interceptor)));
        id
    }

    /// Append a closure to the inbound chain.
    pub fn add_inbound<F>(&self, name: impl Into<String>, f: F) -> InterceptorId
    where
        F: Fn(&mut InterceptionEvent<'_>) -> Interception + Send + Sync + 'static,
    {
        self.register(Direction::Inbound, FnInterceptor::new(name, f))
    }

    /// Append a closure to the outbound chain.
    pub fn add_outbound<F>(&self, name: impl Into<String>, f: F) -> InterceptorId
    where
        F: Fn(&mut InterceptionEvent<'_>) -> Interception + Send + Sync + 'static,
    {
        self.register(Direction::Outbound, FnInterceptor::new(name, f))
    }

    /// Remove a previously registered interceptor. Returns `false` if it was
    /// already gone.
    pub fn remove(&self, id: InterceptorId) -> bool {
        [Direction::Inbound, Direction::Outbound]
            .into_iter()
            .any(|direction| {
                let mut stages = self
                    .stages(direction)
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                let before = stages.len();
                stages.retain(|(stage_id, _)| *stage_id != id);
                stages.len() != before
            })
    }

    /// Number of interceptors registered for `direction`.
    #[must_use]
    pub fn len(&self, direction: Direction) -> usize {
        self.stages(direction)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check whether both chains are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len(Direction::Inbound) == 0 && self.len(Direction::Outbound) == 0
    }

    /// Drive `message` through the chain for `direction`.
    ///
    /// Interceptors run one after another in registration order; each sees
    /// the edits of the ones before it. The first `Abort` stops the chain.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Aborted`] naming the interceptor that aborted.
    pub fn run(
        &self,
        direction: Direction,
        kind: DeliveryKind,
        message: Message,
        context: &Context,
    ) -> Result<Message, BusError> {
        let stages: Vec<Arc<dyn Interceptor>> = self
            .stages(direction)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect();

        let mut event = InterceptionEvent::new(direction, kind, message, context);
        for interceptor in stages {
            if let Interception::Abort { reason } = interceptor.intercept(&mut event) {
                return Err(BusError::Aborted {
                    address: event.message().address().to_string(),
                    interceptor: interceptor.name().to_string(),
                    reason,
                });
            }
        }

        Ok(event.into_message())
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("inbound", &self.len(Direction::Inbound))
            .field("outbound", &self.len(Direction::Outbound))
            .finish()
    }
}
