//! Task-scoped key/value context.
//!
//! A [`Context`] holds the string entries (for example a `trace.id`) that belong
//! to one logical task: one inbound request, one consumer invocation, or the
//! continuation chain of a request awaiting its reply.
//!
//! There is no ambient store. The context is an explicit handle that callers
//! pass to every bus operation and that consumers receive inside their
//! [`Delivery`](crate::event_bus::Delivery). Propagation across an asynchronous
//! hop is therefore always an explicit capture (at send time) followed by an
//! explicit restore (at receive time).
//!
//! # Scopes
//!
//! ```text
//!  request task                       consumer task
//! ┌──────────────────┐   fork()     ┌──────────────────┐
//! │ trace.id = abc   │ ───────────▶ │ trace.id = abc   │
//! │                  │              │ user = bob       │  (not visible upstream)
//! └──────────────────┘              └──────────────────┘
//! ```
//!
//! Cloning a [`Context`] shares the scope: every clone observes the same
//! entries. [`Context::fork`] copies the entries into a brand new scope, so
//! later writes on either side never leak into the other.
//!
//! # Example
//!
//! ```
//! use contextual_bus_core::context::Context;
//!
//! let request = Context::new();
//! request.put("trace.id", "abc123");
//!
//! let child = request.fork();
//! child.put("user", "bob");
//!
//! assert_eq!(child.get_or_default("trace.id", ""), "abc123");
//! assert_eq!(request.get_or_default("user", "anonymous"), "anonymous");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Handle to the key/value scope of one logical task.
///
/// Handles are cheap to clone; clones refer to the same scope. Use
/// [`Context::fork`] to hand a snapshot to a child task.
#[derive(Clone, Default)]
pub struct Context {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl Context {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with the given entries.
    #[must_use]
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();

        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Set `key` to `value` in this scope, replacing any previous value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Read the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Read the value stored under `key`, or `fallback` when it is absent.
    ///
    /// Absent keys never fail.
    #[must_use]
    pub fn get_or_default(&self, key: &str, fallback: impl Into<String>) -> String {
        self.get(key).unwrap_or_else(|| fallback.into())
    }

    /// Remove `key` from this scope, returning the previous value.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Check whether `key` is set in this scope.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Create a child scope holding a copy of the current entries.
    ///
    /// The child is independent: writes to the parent after the fork are not
    /// visible in the child, and writes to the child never reach the parent.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            entries: Arc::new(RwLock::new(self.snapshot())),
        }
    }

    /// Copy of the current entries, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries in this scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check whether this scope has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether `other` is a handle to the same scope (not merely equal
    /// entries).
    #[must_use]
    pub fn shares_scope_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}
