//! Consumer registry with per-address round-robin selection.

use contextual_bus_core::Consumer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A registered consumer and its id.
pub(crate) type Registered = (u64, Arc<dyn Consumer>);

#[derive(Default)]
struct AddressConsumers {
    consumers: Vec<Registered>,
    cursor: usize,
}

/// Consumers keyed by address.
#[derive(Default)]
pub(crate) struct ConsumerRegistry {
    addresses: Mutex<HashMap<String, AddressConsumers>>,
    next_id: AtomicU64,
}

impl ConsumerRegistry {
    pub(crate) fn register(&self, address: &str, consumer: Arc<dyn Consumer>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.to_string())
            .or_default()
            .consumers
            .push((id, consumer));
        id
    }

    pub(crate) fn unregister(&self, address: &str, id: u64) -> bool {
        let mut addresses = self.addresses.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = addresses.get_mut(address) else {
            return false;
        };

        let before = entry.consumers.len();
        entry.consumers.retain(|(existing, _)| *existing != id);
        let removed = entry.consumers.len() != before;

        if entry.consumers.is_empty() {
            addresses.remove(address);
        }
        removed
    }

    /// Every consumer of `address`, in registration order.
    pub(crate) fn all(&self, address: &str) -> Vec<Registered> {
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map(|entry| entry.consumers.clone())
            .unwrap_or_default()
    }

    /// The next consumer of `address` in round-robin order.
    pub(crate) fn next(&self, address: &str) -> Option<Registered> {
        let mut addresses = self.addresses.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = addresses.get_mut(address)?;
        if entry.consumers.is_empty() {
            return None;
        }

        let index = entry.cursor % entry.consumers.len();
        entry.cursor = entry.cursor.wrapping_add(1);
        entry.consumers.get(index).cloned()
    }

    pub(crate) fn count(&self, address: &str) -> usize {
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map_or(0, |entry| entry.consumers.len())
    }

    pub(crate) fn address_count(&self) -> usize {
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use contextual_bus_core::Delivery;

    fn noop() -> Arc<dyn Consumer> {
        Arc::new(|_delivery: Delivery| async {})
    }

    #[test]
    fn test_round_robin_cycles_in_registration_order() {
        let registry = ConsumerRegistry::default();
        let first = registry.register("foo", noop());
        let second = registry.register("foo", noop());
        let third = registry.register("foo", noop());

        let picked: Vec<u64> = (0..6)
            .map(|_| registry.next("foo").unwrap().0)
            .collect();
        assert_eq!(picked, vec![first, second, third, first, second, third]);
    }

    #[test]
    fn test_unknown_address() {
        let registry = ConsumerRegistry::default();
        assert!(registry.next("nobody").is_none());
        assert!(registry.all("nobody").is_empty());
        assert!(!registry.unregister("nobody", 0));
    }

    #[test]
    fn test_unregister_drops_empty_address() {
        let registry = ConsumerRegistry::default();
        let id = registry.register("foo", noop());
        registry.register("bar", noop());
        assert_eq!(registry.address_count(), 2);

        assert!(registry.unregister("foo", id));
        assert!(!registry.unregister("foo", id));
        assert_eq!(registry.count("foo"), 0);
        assert_eq!(registry.address_count(), 1);
    }

    #[test]
    fn test_round_robin_survives_removal() {
        let registry = ConsumerRegistry::default();
        let first = registry.register("foo", noop());
        let second = registry.register("foo", noop());
        registry.next("foo");

        assert!(registry.unregister("foo", second));
        assert_eq!(registry.next("foo").unwrap().0, first);
        assert_eq!(registry.next("foo").unwrap().0, first);
    }
}
