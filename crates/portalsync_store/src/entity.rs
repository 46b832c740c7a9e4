//! Entity identity and the named-entity contract.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned identity for a persisted entity.
///
/// Identity is exclusively owned by the store: entities arriving over the
/// wire carry no `EntityId`, and the store assigns one on first save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Contract for entities kept in the store and cache.
///
/// An entity is keyed by a unique name (for synced entities this is the
/// portal-assigned UUID string), carries a store-owned [`EntityId`] and a
/// monotonic version, and can report semantic equality of its payload.
pub trait NamedEntity: Clone + Send + Sync + 'static {
    /// Returns the store-assigned identity, if the entity was persisted.
    fn id(&self) -> Option<EntityId>;

    /// Sets the store-assigned identity. Called only by the store.
    fn set_id(&mut self, id: EntityId);

    /// Returns the unique name keying this entity.
    fn name(&self) -> &str;

    /// Returns the optimistic version counter.
    fn version(&self) -> i64;

    /// Sets the version counter. Called only by the store.
    fn set_version(&mut self, version: i64);

    /// Returns true if `other` carries the same payload.
    ///
    /// Identity and version are excluded: two records with the same
    /// payload are semantically equal regardless of how often either
    /// was saved.
    fn content_eq(&self, other: &Self) -> bool;
}
