//! Table of requests awaiting a reply.
//!
//! Each in-flight request owns one entry keyed by its unique reply address.
//! Whoever removes the entry (a reply, a failure, an inbound abort, or the
//! timeout) is the only party allowed to complete the request, so every
//! request completes exactly once.

use contextual_bus_core::{BusError, Context, Message};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Outcome delivered to the waiting requester.
pub(crate) type ReplyResult = Result<Message, BusError>;

/// One request awaiting its reply.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) correlation_id: Uuid,
    pub(crate) address: String,
    pub(crate) timeout: Duration,
    pub(crate) deadline: Instant,
    /// Fork of the requester's context; the reply's inbound chain runs
    /// against it.
    pub(crate) origin: Context,
    slot: oneshot::Sender<ReplyResult>,
}

impl PendingRequest {
    pub(crate) const fn new(
        correlation_id: Uuid,
        address: String,
        timeout: Duration,
        deadline: Instant,
        origin: Context,
        slot: oneshot::Sender<ReplyResult>,
    ) -> Self {
        Self {
            correlation_id,
            address,
            timeout,
            deadline,
            origin,
            slot,
        }
    }

    pub(crate) fn is_overdue(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    /// Complete the request with [`BusError::Timeout`].
    pub(crate) fn expire(self) -> bool {
        let err = BusError::Timeout {
            address: self.address.clone(),
            timeout: self.timeout,
        };
        self.resolve(Err(err))
    }

    /// Complete the request. Returns `false` if the requester is gone.
    pub(crate) fn resolve(self, result: ReplyResult) -> bool {
        self.slot.send(result).is_ok()
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    table: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingRequests {
    pub(crate) fn insert(&self, reply_address: String, request: PendingRequest) {
        let len = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.insert(reply_address, request);
            table.len()
        };
        record_len(len);
    }

    /// Remove the entry, transferring the right to complete it.
    pub(crate) fn take(&self, reply_address: &str) -> Option<PendingRequest> {
        let (request, len) = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            (table.remove(reply_address), table.len())
        };
        if request.is_some() {
            record_len(len);
        }
        request
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Entries whose deadline has passed without anyone collecting them.
    pub(crate) fn overdue(&self, now: Instant) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|request| request.is_overdue(now))
            .count()
    }
}

#[allow(clippy::cast_precision_loss)] // Table sizes stay far below 2^52
fn record_len(len: usize) {
    metrics::gauge!("event_bus_pending_requests").set(len as f64);
}

/// Removes the entry when the request future is dropped before completion.
pub(crate) struct PendingGuard {
    pending: Arc<PendingRequests>,
    reply_address: String,
}

impl PendingGuard {
    pub(crate) const fn new(pending: Arc<PendingRequests>, reply_address: String) -> Self {
        Self {
            pending,
            reply_address,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(request) = self.pending.take(&self.reply_address) {
            tracing::debug!(
                correlation_id = %request.correlation_id,
                address = %request.address,
                "Request abandoned before a reply arrived"
            );
        }
    }
}
