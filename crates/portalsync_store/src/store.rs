//! Node-local entity store, property store and transaction contracts.

use crate::entity::{EntityId, NamedEntity};
use crate::error::StoreResult;

/// CRUD over entities keyed by unique name.
///
/// Every read returns a deep copy: callers never share mutable state with
/// the store.
pub trait EntityStore<E: NamedEntity>: Send + Sync {
    /// Persists a new entity.
    ///
    /// Assigns a fresh identity and version 1, ignoring any identity the
    /// caller set. Fails `DuplicateKey` if the name exists. Returns the
    /// persisted snapshot.
    fn save(&self, entity: &E) -> StoreResult<E>;

    /// Updates the entity with the same unique name.
    ///
    /// Identity and version are carried over from the current record; the
    /// version is bumped unless the payload is semantically unchanged, in
    /// which case the stored record is returned as-is. Fails `NotFound`
    /// if no record exists for the name.
    fn update(&self, entity: &E) -> StoreResult<E>;

    /// Deletes the entity with the given name. Fails `NotFound` if absent.
    fn delete_by_name(&self, name: &str) -> StoreResult<()>;

    /// Finds an entity by unique name.
    fn find_by_name(&self, name: &str) -> StoreResult<Option<E>>;

    /// Finds an entity by store-assigned identity.
    fn find_by_id(&self, id: EntityId) -> StoreResult<Option<E>>;

    /// Returns all entities.
    fn find_all(&self) -> StoreResult<Vec<E>>;
}

/// Cluster property storage, used for sync cursors.
pub trait PropertyStore: Send + Sync {
    /// Reads a property value.
    fn get_property(&self, name: &str) -> StoreResult<Option<String>>;

    /// Writes a property value.
    fn put_property(&self, name: &str, value: &str) -> StoreResult<()>;
}

/// One local transaction at a time over a store.
///
/// There is no nesting and no cross-node coordination: cross-node
/// consistency comes from the idempotent delta/postback protocol, never
/// from distributed transactions.
pub trait Transactional: Send + Sync {
    /// Begins a transaction. Fails if one is already active.
    fn begin(&self) -> StoreResult<()>;

    /// Commits the active transaction.
    fn commit(&self) -> StoreResult<()>;

    /// Rolls the active transaction back, restoring the pre-begin state.
    fn rollback(&self) -> StoreResult<()>;
}
