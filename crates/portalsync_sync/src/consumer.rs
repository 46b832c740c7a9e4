//! Delta application on the node-local store.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use portalsync_cache::GenericEntityCache;
use portalsync_protocol::{
    DeltaEnvelope, EntityError, PostbackEnvelope, ProtocolError, SyncEntity, SyncStatus,
};
use portalsync_store::{EntityStore, NamedEntity, PropertyStore, StoreError, Transactional};
use std::sync::Arc;
use tracing::{error, warn};

/// The generic message reported for entities a round failed to apply.
pub const APPLY_FAILURE_MESSAGE: &str = "Database transaction failed";

/// Per-entity outcome of one applied delta.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Entity type of the applied delta.
    pub entity_type: portalsync_protocol::EntityType,
    /// Window start of the applied delta.
    pub increment_start: i64,
    /// Window end of the applied delta.
    pub increment_end: i64,
    /// Whether the delta was a bulk resync.
    pub bulk_sync: bool,
    /// Unique keys that reached their desired state.
    pub applied: Vec<String>,
    /// Per-entity failures. Empty means full success.
    pub failed: Vec<EntityError>,
}

impl ApplyOutcome {
    /// Classifies the outcome.
    pub fn status(&self) -> SyncStatus {
        if self.failed.is_empty() {
            SyncStatus::Ok
        } else if self.applied.is_empty() {
            SyncStatus::Error
        } else {
            SyncStatus::Partial
        }
    }

    /// Builds the postback acknowledging this outcome.
    pub fn to_postback(&self) -> PostbackEnvelope {
        let sync_log = format!(
            "applied {} of {} entities",
            self.applied.len(),
            self.applied.len() + self.failed.len()
        );
        let postback = match self.status() {
            SyncStatus::Ok => PostbackEnvelope::ok(
                self.entity_type,
                self.increment_start,
                self.increment_end,
            ),
            SyncStatus::Partial => PostbackEnvelope::partial(
                self.entity_type,
                self.increment_start,
                self.increment_end,
                self.failed.clone(),
            ),
            SyncStatus::Error => PostbackEnvelope::error(
                self.entity_type,
                self.increment_start,
                self.increment_end,
                APPLY_FAILURE_MESSAGE,
                self.failed.clone(),
            ),
        };
        postback
            .with_bulk_sync(self.bulk_sync)
            .with_sync_log(sync_log)
    }
}

/// Applies received deltas to the node-local store through the cache.
///
/// One invocation runs inside one local transaction: adds, then updates,
/// then deletes, then the cursor watermark. Partial *commit* is
/// unsupported — an infrastructure failure rolls everything back and
/// reports the whole batch failed; partial success across entities is
/// expressed only through the postback and retried next round.
pub struct IncrementConsumer<E, S>
where
    E: SyncEntity,
    S: EntityStore<E> + PropertyStore + Transactional + 'static,
{
    cache: Arc<GenericEntityCache<E, S>>,
    config: SyncConfig,
}

impl<E, S> IncrementConsumer<E, S>
where
    E: SyncEntity,
    S: EntityStore<E> + PropertyStore + Transactional + 'static,
{
    /// Creates a consumer applying through the given cache.
    pub fn new(cache: Arc<GenericEntityCache<E, S>>, config: SyncConfig) -> Self {
        Self { cache, config }
    }

    /// Applies one delta envelope.
    ///
    /// Structural failures (`UnsupportedEntityType`, validation) reject
    /// the whole envelope before any mutation. Everything else is
    /// reported through the returned outcome, never raised.
    pub fn apply(&self, envelope: &DeltaEnvelope<E>) -> SyncResult<ApplyOutcome> {
        if envelope.entity_type != E::ENTITY_TYPE {
            return Err(SyncError::Protocol(ProtocolError::UnsupportedEntityType(
                envelope.entity_type.as_str().to_string(),
            )));
        }
        envelope.validate()?;

        let store = Arc::clone(self.cache.store());
        store.begin()?;

        match self.apply_batch(&store, envelope) {
            Ok(outcome) => match store.commit() {
                Ok(()) => Ok(outcome),
                Err(e) => Ok(self.fail_batch(&store, envelope, e)),
            },
            Err(e) => Ok(self.fail_batch(&store, envelope, e)),
        }
    }

    fn apply_batch(
        &self,
        store: &Arc<S>,
        envelope: &DeltaEnvelope<E>,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut applied = Vec::new();
        let mut failed = Vec::new();

        // Partition by local presence of the unique key.
        let mut adds = Vec::new();
        let mut updates = Vec::new();
        for entity in &envelope.new_or_updated_entities {
            if store.find_by_name(entity.name())?.is_some() {
                updates.push(entity);
            } else {
                adds.push(entity);
            }
        }

        for entity in adds {
            self.apply_one(entity.name(), &mut applied, &mut failed, || {
                self.cache.add(entity).map(|_| ())
            })?;
        }
        // Updates go through the cache so an unchanged entity is a no-op.
        for entity in updates {
            self.apply_one(entity.name(), &mut applied, &mut failed, || {
                self.cache.update(entity).map(|_| ())
            })?;
        }
        for id in &envelope.deleted_ids {
            if store.find_by_name(id)?.is_some() {
                self.apply_one(id, &mut applied, &mut failed, || self.cache.delete(id))?;
            } else {
                // Already absent: re-delivered deletes are no-ops.
                applied.push(id.clone());
            }
        }

        // Cursor watermark advances in the same transaction.
        store.put_property(
            &self.config.cursor_property(E::ENTITY_TYPE),
            &envelope.increment_end.to_string(),
        )?;

        Ok(ApplyOutcome {
            entity_type: envelope.entity_type,
            increment_start: envelope.increment_start,
            increment_end: envelope.increment_end,
            bulk_sync: envelope.bulk_sync,
            applied,
            failed,
        })
    }

    fn apply_one(
        &self,
        name: &str,
        applied: &mut Vec<String>,
        failed: &mut Vec<EntityError>,
        op: impl FnOnce() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        match op() {
            Ok(()) => {
                applied.push(name.to_string());
                Ok(())
            }
            Err(e) if e.is_entity_scoped() => {
                warn!(entity = name, error = %e, "entity failed to apply");
                failed.push(EntityError {
                    id: name.to_string(),
                    msg: APPLY_FAILURE_MESSAGE.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn fail_batch(
        &self,
        store: &Arc<S>,
        envelope: &DeltaEnvelope<E>,
        cause: StoreError,
    ) -> ApplyOutcome {
        error!(error = %cause, "delta apply aborted, failing whole batch");
        if let Err(e) = store.rollback() {
            warn!(error = %e, "rollback after failed apply also failed");
        }

        // The store rolled back under entries the cache may have seeded.
        self.cache.evict_names(
            envelope
                .new_or_updated_entities
                .iter()
                .map(|e| e.name().to_string())
                .chain(envelope.deleted_ids.iter().cloned()),
        );

        let failed = envelope
            .new_or_updated_entities
            .iter()
            .map(|e| e.name().to_string())
            .chain(envelope.deleted_ids.iter().cloned())
            .map(|id| EntityError {
                id,
                msg: APPLY_FAILURE_MESSAGE.to_string(),
            })
            .collect();

        ApplyOutcome {
            entity_type: envelope.entity_type,
            increment_start: envelope.increment_start,
            increment_end: envelope.increment_end,
            bulk_sync: envelope.bulk_sync,
            applied: Vec::new(),
            failed,
        }
    }
}
