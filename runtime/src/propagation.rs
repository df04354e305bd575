//! Context propagation interceptors.
//!
//! [`ContextPropagation`] installs a pair of interceptors on a bus:
//!
//! - **outbound**: copies each configured context entry of the sending task
//!   into a message header of the same name
//! - **inbound**: copies each such header back into the receiving task's
//!   context before the consumer runs
//!
//! A header the sender already set explicitly is left untouched. Empty values
//! are treated as absent in both directions.
//!
//! # Example
//!
//! ```
//! use contextual_bus_core::{Direction, InterceptorChain};
//! use contextual_bus_runtime::ContextPropagation;
//!
//! let chain = InterceptorChain::new();
//! ContextPropagation::trace_id().install(&chain);
//!
//! assert_eq!(chain.len(Direction::Outbound), 1);
//! assert_eq!(chain.len(Direction::Inbound), 1);
//! ```

use contextual_bus_core::{
    keys, Direction, Interception, InterceptionEvent, Interceptor, InterceptorChain, InterceptorId,
};

/// Propagates a fixed set of context keys across bus hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPropagation {
    keys: Vec<String>,
}

impl ContextPropagation {
    /// Propagate the given context keys.
    #[must_use]
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Propagate only [`keys::TRACE_ID`].
    #[must_use]
    pub fn trace_id() -> Self {
        Self::new([keys::TRACE_ID])
    }

    /// Keys being propagated.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Append the outbound and inbound interceptors to `chain`.
    ///
    /// Returns the ids of the `(outbound, inbound)` interceptors so they can
    /// be removed again.
    pub fn install(&self, chain: &InterceptorChain) -> (InterceptorId, InterceptorId) {
        let outbound = chain.register(
            Direction::Outbound,
            PropagateOutbound {
                keys: self.keys.clone(),
            },
        );
        let inbound = chain.register(
            Direction::Inbound,
            RestoreInbound {
                keys: self.keys.clone(),
            },
        );
        (outbound, inbound)
    }
}

/// Outbound half: context entry to header.
#[derive(Debug)]
struct PropagateOutbound {
    keys: Vec<String>,
}

impl Interceptor for PropagateOutbound {
    fn intercept(&self, event: &mut InterceptionEvent<'_>) -> Interception {
        for key in &self.keys {
            let value = event.context().get(key).filter(|value| !value.is_empty());
            tracing::info!(
                key = %key,
                value = value.as_deref().unwrap_or("-"),
                kind = %event.kind(),
                address = %event.message().address(),
                "In outbound interceptor"
            );

            if let Some(value) = value {
                if !event.headers().contains(key) {
                    event.headers_mut().add(key.as_str(), value);
                }
            }
        }
        Interception::Continue
    }

    fn name(&self) -> &str {
        "context-propagation-outbound"
    }
}

/// Inbound half: header to context entry.
#[derive(Debug)]
struct RestoreInbound {
    keys: Vec<String>,
}

impl Interceptor for RestoreInbound {
    fn intercept(&self, event: &mut InterceptionEvent<'_>) -> Interception {
        for key in &self.keys {
            let value = event
                .headers()
                .get(key)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            tracing::info!(
                key = %key,
                value = value.as_deref().unwrap_or("-"),
                kind = %event.kind(),
                address = %event.message().address(),
                "In inbound interceptor"
            );

            if let Some(value) = value {
                event.context().put(key.as_str(), value);
            }
        }
        Interception::Continue
    }

    fn name(&self) -> &str {
        "context-propagation-inbound"
    }
}
