//! Cluster invalidation bus.
//!
//! Nodes publish invalidation events naming the store identities of
//! entities that changed elsewhere in the cluster; caches subscribe per
//! entity class and unsubscribe on shutdown.

use parking_lot::RwLock;
use portalsync_store::EntityId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The operation an invalidation event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOperation {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

/// An invalidation event for a set of entities of one class.
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// The entity class the event applies to.
    pub entity_class: String,
    /// Store identities of the affected entities.
    pub ids: Vec<EntityId>,
    /// Operations that produced the event, parallel to `ids`.
    pub operations: Vec<EntityOperation>,
}

/// A subscriber callback.
pub type Listener = Arc<dyn Fn(&InvalidationEvent) + Send + Sync>;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Pub/sub over invalidation events.
pub trait InvalidationBus: Send + Sync {
    /// Registers a listener for events of the given entity class.
    fn subscribe(&self, entity_class: &str, listener: Listener) -> SubscriptionId;

    /// Removes a previously registered listener. Unknown ids are no-ops.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// An in-process invalidation bus.
pub struct MemoryInvalidationBus {
    subscribers: RwLock<HashMap<u64, (String, Listener)>>,
    next_id: AtomicU64,
}

impl MemoryInvalidationBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Delivers an event to every listener of its entity class.
    ///
    /// Returns the number of listeners notified.
    pub fn publish(&self, event: &InvalidationEvent) -> usize {
        let listeners: Vec<Listener> = self
            .subscribers
            .read()
            .values()
            .filter(|(class, _)| *class == event.entity_class)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in &listeners {
            (**listener)(event);
        }
        listeners.len()
    }

    /// Returns the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for MemoryInvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus for MemoryInvalidationBus {
    fn subscribe(&self, entity_class: &str, listener: Listener) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .write()
            .insert(id, (entity_class.to_string(), listener));
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().remove(&id.0);
    }
}

/// A subscription that unsubscribes when dropped.
pub struct BusSubscription {
    bus: Arc<dyn InvalidationBus>,
    id: SubscriptionId,
}

impl BusSubscription {
    /// Wraps an existing subscription.
    pub fn new(bus: Arc<dyn InvalidationBus>, id: SubscriptionId) -> Self {
        Self { bus, id }
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn event(class: &str, ids: Vec<EntityId>) -> InvalidationEvent {
        let operations = ids.iter().map(|_| EntityOperation::Update).collect();
        InvalidationEvent {
            entity_class: class.to_string(),
            ids,
            operations,
        }
    }

    #[test]
    fn publish_reaches_matching_class_only() {
        let bus = MemoryInvalidationBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_apps = Arc::clone(&seen);
        bus.subscribe(
            "application",
            Arc::new(move |e| seen_apps.lock().push(e.entity_class.clone())),
        );

        assert_eq!(bus.publish(&event("application", vec![EntityId::new()])), 1);
        assert_eq!(bus.publish(&event("api_key", vec![EntityId::new()])), 0);
        assert_eq!(seen.lock().as_slice(), ["application"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = MemoryInvalidationBus::new();
        let id = bus.subscribe("application", Arc::new(|_| {}));
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(&event("application", vec![])), 0);

        // Unknown ids are no-ops.
        bus.unsubscribe(id);
    }

    #[test]
    fn drop_guard_unsubscribes() {
        let bus = Arc::new(MemoryInvalidationBus::new());
        let id = bus.subscribe("application", Arc::new(|_| {}));
        {
            let _guard = BusSubscription::new(Arc::clone(&bus) as Arc<dyn InvalidationBus>, id);
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }
}
