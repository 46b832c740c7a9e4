//! In-memory node store.

use crate::entity::{EntityId, NamedEntity};
use crate::error::{StoreError, StoreResult};
use crate::store::{EntityStore, PropertyStore, Transactional};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

type Undo<E> = (HashMap<String, E>, HashMap<String, String>);

/// An in-memory entity + property store with snapshot transactions.
///
/// This is the node-local store used by embedded deployments and tests.
/// `begin` snapshots both maps; `rollback` restores them wholesale, which
/// is exactly the all-or-nothing contract a consumer pass needs.
pub struct MemoryNodeStore<E: NamedEntity> {
    entities: RwLock<HashMap<String, E>>,
    properties: RwLock<HashMap<String, String>>,
    undo: Mutex<Option<Undo<E>>>,
}

impl<E: NamedEntity> MemoryNodeStore<E> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            properties: RwLock::new(HashMap::new()),
            undo: Mutex::new(None),
        }
    }

    /// Returns the number of stored entities.
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }
}

impl<E: NamedEntity> Default for MemoryNodeStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: NamedEntity> EntityStore<E> for MemoryNodeStore<E> {
    fn save(&self, entity: &E) -> StoreResult<E> {
        let mut entities = self.entities.write();
        if entities.contains_key(entity.name()) {
            return Err(StoreError::duplicate_key(entity.name()));
        }
        let mut persisted = entity.clone();
        persisted.set_id(EntityId::new());
        persisted.set_version(1);
        entities.insert(persisted.name().to_string(), persisted.clone());
        Ok(persisted)
    }

    fn update(&self, entity: &E) -> StoreResult<E> {
        let mut entities = self.entities.write();
        let current = entities
            .get(entity.name())
            .ok_or_else(|| StoreError::not_found(entity.name()))?;

        if current.content_eq(entity) {
            return Ok(current.clone());
        }

        let mut persisted = entity.clone();
        match current.id() {
            Some(id) => persisted.set_id(id),
            None => persisted.set_id(EntityId::new()),
        }
        persisted.set_version(current.version() + 1);
        entities.insert(persisted.name().to_string(), persisted.clone());
        Ok(persisted)
    }

    fn delete_by_name(&self, name: &str) -> StoreResult<()> {
        self.entities
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(name))
    }

    fn find_by_name(&self, name: &str) -> StoreResult<Option<E>> {
        Ok(self.entities.read().get(name).cloned())
    }

    fn find_by_id(&self, id: EntityId) -> StoreResult<Option<E>> {
        Ok(self
            .entities
            .read()
            .values()
            .find(|e| e.id() == Some(id))
            .cloned())
    }

    fn find_all(&self) -> StoreResult<Vec<E>> {
        Ok(self.entities.read().values().cloned().collect())
    }
}

impl<E: NamedEntity> PropertyStore for MemoryNodeStore<E> {
    fn get_property(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self.properties.read().get(name).cloned())
    }

    fn put_property(&self, name: &str, value: &str) -> StoreResult<()> {
        self.properties
            .write()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

impl<E: NamedEntity> Transactional for MemoryNodeStore<E> {
    fn begin(&self) -> StoreResult<()> {
        let mut undo = self.undo.lock();
        if undo.is_some() {
            return Err(StoreError::transient("transaction already active"));
        }
        *undo = Some((self.entities.read().clone(), self.properties.read().clone()));
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        self.undo
            .lock()
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::transient("no active transaction"))
    }

    fn rollback(&self) -> StoreResult<()> {
        let (entities, properties) = self
            .undo
            .lock()
            .take()
            .ok_or_else(|| StoreError::transient("no active transaction"))?;
        *self.entities.write() = entities;
        *self.properties.write() = properties;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct TestEntity {
        id: Option<EntityId>,
        name: String,
        version: i64,
        payload: String,
    }

    impl TestEntity {
        fn new(name: &str, payload: &str) -> Self {
            Self {
                id: None,
                name: name.into(),
                version: 0,
                payload: payload.into(),
            }
        }
    }

    impl NamedEntity for TestEntity {
        fn id(&self) -> Option<EntityId> {
            self.id
        }
        fn set_id(&mut self, id: EntityId) {
            self.id = Some(id);
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn version(&self) -> i64 {
            self.version
        }
        fn set_version(&mut self, version: i64) {
            self.version = version;
        }
        fn content_eq(&self, other: &Self) -> bool {
            self.name == other.name && self.payload == other.payload
        }
    }

    #[test]
    fn save_assigns_identity_and_version() {
        let store = MemoryNodeStore::new();
        let saved = store.save(&TestEntity::new("a1", "x")).unwrap();
        assert!(saved.id.is_some());
        assert_eq!(saved.version, 1);
    }

    #[test]
    fn save_duplicate_name_fails() {
        let store = MemoryNodeStore::new();
        store.save(&TestEntity::new("a1", "x")).unwrap();
        let err = store.save(&TestEntity::new("a1", "y")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn update_preserves_identity_and_bumps_version() {
        let store = MemoryNodeStore::new();
        let saved = store.save(&TestEntity::new("a1", "x")).unwrap();

        let updated = store.update(&TestEntity::new("a1", "y")).unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.version, 2);
        assert_eq!(updated.payload, "y");
    }

    #[test]
    fn update_unchanged_is_a_noop() {
        let store = MemoryNodeStore::new();
        store.save(&TestEntity::new("a1", "x")).unwrap();

        let result = store.update(&TestEntity::new("a1", "x")).unwrap();
        assert_eq!(result.version, 1);
    }

    #[test]
    fn update_missing_fails_not_found() {
        let store = MemoryNodeStore::new();
        let err = store.update(&TestEntity::new("a1", "x")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn find_by_id_resolves() {
        let store = MemoryNodeStore::new();
        let saved = store.save(&TestEntity::new("a1", "x")).unwrap();
        let found = store.find_by_id(saved.id.unwrap()).unwrap().unwrap();
        assert_eq!(found.name, "a1");
        assert!(store.find_by_id(EntityId::new()).unwrap().is_none());
    }

    #[test]
    fn reads_return_copies() {
        let store = MemoryNodeStore::new();
        store.save(&TestEntity::new("a1", "x")).unwrap();
        let mut copy = store.find_by_name("a1").unwrap().unwrap();
        copy.payload = "mutated".into();
        assert_eq!(store.find_by_name("a1").unwrap().unwrap().payload, "x");
    }

    #[test]
    fn rollback_restores_entities_and_properties() {
        let store = MemoryNodeStore::new();
        store.save(&TestEntity::new("a1", "x")).unwrap();
        store.put_property("cursor", "100").unwrap();

        store.begin().unwrap();
        store.save(&TestEntity::new("a2", "y")).unwrap();
        store.delete_by_name("a1").unwrap();
        store.put_property("cursor", "200").unwrap();
        store.rollback().unwrap();

        assert!(store.find_by_name("a1").unwrap().is_some());
        assert!(store.find_by_name("a2").unwrap().is_none());
        assert_eq!(store.get_property("cursor").unwrap().unwrap(), "100");
    }

    #[test]
    fn commit_keeps_changes() {
        let store = MemoryNodeStore::new();
        store.begin().unwrap();
        store.save(&TestEntity::new("a1", "x")).unwrap();
        store.put_property("cursor", "100").unwrap();
        store.commit().unwrap();

        assert!(store.find_by_name("a1").unwrap().is_some());
        assert_eq!(store.get_property("cursor").unwrap().unwrap(), "100");
    }

    #[test]
    fn nested_begin_fails() {
        let store: MemoryNodeStore<TestEntity> = MemoryNodeStore::new();
        store.begin().unwrap();
        assert!(store.begin().is_err());
        store.commit().unwrap();
    }

    #[test]
    fn commit_without_begin_fails() {
        let store: MemoryNodeStore<TestEntity> = MemoryNodeStore::new();
        assert!(store.commit().is_err());
        assert!(store.rollback().is_err());
    }
}
