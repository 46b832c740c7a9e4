//! Generic entity cache.

use crate::bus::{BusSubscription, InvalidationBus, InvalidationEvent, Listener};
use parking_lot::{Mutex, RwLock};
use portalsync_store::{EntityId, EntityStore, NamedEntity, StoreError, StoreResult};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Default size of the writer lock-bucket array.
pub const DEFAULT_LOCK_BUCKETS: usize = 1000;

/// A read-through cache of named-entity snapshots.
///
/// Two maps back the cache: unique name → snapshot, and store identity →
/// name. The id index exists only to resolve cluster invalidation events
/// and is never a source of truth; it is append-only between wipes.
///
/// Writers for the *same* name are serialized through a bounded
/// lock-bucket array (`hash(name) % N`); writers for different names and
/// all readers proceed concurrently. Every returned entity is a deep copy,
/// so callers never share mutable state with the cache or the store.
pub struct GenericEntityCache<E: NamedEntity, S: EntityStore<E>> {
    store: Arc<S>,
    entries: RwLock<HashMap<String, E>>,
    id_index: RwLock<HashMap<EntityId, String>>,
    locks: Box<[Mutex<()>]>,
}

impl<E: NamedEntity, S: EntityStore<E>> GenericEntityCache<E, S> {
    /// Creates a cache over the given store with the default bucket count.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_lock_buckets(store, DEFAULT_LOCK_BUCKETS)
    }

    /// Creates a cache with an explicit lock-bucket count.
    pub fn with_lock_buckets(store: Arc<S>, buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let locks = (0..buckets).map(|_| Mutex::new(())).collect();
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            id_index: RwLock::new(HashMap::new()),
            locks,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn bucket(&self, name: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % self.locks.len()]
    }

    fn seed(&self, entity: &E) {
        self.entries
            .write()
            .insert(entity.name().to_string(), entity.clone());
        if let Some(id) = entity.id() {
            self.id_index.write().insert(id, entity.name().to_string());
        }
    }

    /// Persists a new entity and seeds both cache maps.
    ///
    /// Fails `DuplicateKey` if the name already exists in the store.
    pub fn add(&self, entity: &E) -> StoreResult<E> {
        let persisted = self.store.save(entity)?;
        self.seed(&persisted);
        Ok(persisted)
    }

    /// Updates an existing entity, serializing same-name writers.
    ///
    /// Inside the name lock the current record is re-read. A semantically
    /// equal request skips the persist but still refreshes the cache; an
    /// actual change is persisted preserving the current record's identity
    /// and version lineage. Fails `NotFound` if no record exists.
    pub fn update(&self, entity: &E) -> StoreResult<E> {
        let _guard = self.bucket(entity.name()).lock();

        let current = self
            .store
            .find_by_name(entity.name())?
            .ok_or_else(|| StoreError::not_found(entity.name()))?;

        if current.content_eq(entity) {
            self.seed(&current);
            return Ok(current);
        }

        let persisted = self.store.update(entity)?;
        self.seed(&persisted);
        Ok(persisted)
    }

    /// Deletes the named entity from the store and the snapshot map.
    ///
    /// The id index keeps its slot: evicting it here races with a
    /// concurrent add that repopulates the same name, and a late
    /// invalidation for the dead id must not evict that fresh entry.
    pub fn delete(&self, name: &str) -> StoreResult<()> {
        self.store.delete_by_name(name)?;
        self.entries.write().remove(name);
        Ok(())
    }

    /// Looks up an entity by name.
    ///
    /// With `no_cache` false, a hit serves a fresh copy and a miss loads
    /// from the store and populates the cache. With `no_cache` true, any
    /// existing entry is evicted first, the store is consulted, and the
    /// cache is *not* repopulated.
    pub fn find(&self, name: &str, no_cache: bool) -> StoreResult<Option<E>> {
        if no_cache {
            self.entries.write().remove(name);
            return self.store.find_by_name(name);
        }

        if let Some(entity) = self.entries.read().get(name) {
            return Ok(Some(entity.clone()));
        }

        let loaded = self.store.find_by_name(name)?;
        if let Some(ref entity) = loaded {
            self.seed(entity);
        }
        Ok(loaded)
    }

    /// Returns all entities, always bypassing the cache.
    pub fn find_all(&self) -> StoreResult<Vec<E>> {
        self.store.find_all()
    }

    /// Evicts the snapshot entries named by the given store identities.
    ///
    /// Identities the index does not know are no-ops.
    pub fn on_invalidate(&self, ids: &[EntityId]) {
        let mut evicted = 0usize;
        for id in ids {
            let name = self.id_index.read().get(id).cloned();
            if let Some(name) = name {
                if self.entries.write().remove(&name).is_some() {
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            debug!(evicted, "evicted cache entries for invalidation event");
        }
    }

    /// Evicts the snapshot entries for the given names.
    pub fn evict_names<I, T>(&self, names: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut entries = self.entries.write();
        for name in names {
            entries.remove(name.as_ref());
        }
    }

    /// Clears both maps.
    ///
    /// Bounds unbounded growth and self-heals missed invalidations; a
    /// concurrent reader simply reloads on its next miss.
    pub fn wipe(&self) {
        let evicted = {
            let mut entries = self.entries.write();
            let n = entries.len();
            entries.clear();
            n
        };
        self.id_index.write().clear();
        debug!(evicted, "wiped entity cache");
    }

    /// Returns the number of cached snapshots.
    pub fn cached_entries(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns the number of id index slots.
    pub fn indexed_ids(&self) -> usize {
        self.id_index.read().len()
    }
}

impl<E, S> GenericEntityCache<E, S>
where
    E: NamedEntity,
    S: EntityStore<E> + 'static,
{
    /// Subscribes this cache to invalidation events for `entity_class`.
    ///
    /// The listener holds a weak reference; dropping the returned guard
    /// (or the cache itself) ends delivery.
    pub fn subscribe_invalidation(
        self: &Arc<Self>,
        bus: Arc<dyn InvalidationBus>,
        entity_class: &str,
    ) -> BusSubscription {
        let weak = Arc::downgrade(self);
        let listener: Listener = Arc::new(move |event: &InvalidationEvent| {
            if let Some(cache) = weak.upgrade() {
                cache.on_invalidate(&event.ids);
            }
        });
        let id = bus.subscribe(entity_class, listener);
        BusSubscription::new(bus, id)
    }
}
