//! Delta production against the central store.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::queries::{
    changed_entities_params, changed_entities_sql, deleted_entities_params, deleted_entities_sql,
    fetch_entities_sql, tables_for, QueryVariant,
};
use portalsync_protocol::{DeltaEnvelope, SyncEntity};
use portalsync_store::{FromRow, QueryExecutor, SqlValue};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

/// Builds bounded deltas for one (node, tenant) pair.
///
/// A delta covers the window `(cursor, window_end]` and additionally
/// re-selects every entity whose last sync attempt for this node is still
/// flagged errored, so failures retry every round until they succeed.
pub struct IncrementProducer<E: SyncEntity> {
    executor: Arc<dyn QueryExecutor>,
    config: SyncConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<E: SyncEntity> IncrementProducer<E> {
    /// Creates a producer over the given executor.
    pub fn new(executor: Arc<dyn QueryExecutor>, config: SyncConfig) -> Self {
        Self {
            executor,
            config,
            _entity: PhantomData,
        }
    }

    /// Produces the delta for `(cursor, window_end]`.
    ///
    /// An absent cursor is a bulk resync: the window starts at time zero
    /// and the envelope carries the bulk flag.
    pub fn produce(&self, cursor: Option<i64>, window_end: i64) -> SyncResult<DeltaEnvelope<E>> {
        let bulk_sync = cursor.is_none();
        let window_start = cursor.unwrap_or(0);
        let tables = tables_for(E::ENTITY_TYPE);

        // One capability probe decides the query shape for the round.
        let variant =
            QueryVariant::probe(&*self.executor, &self.config.connection, self.config.query_timeout);

        let deleted: BTreeSet<String> = self
            .run(
                &deleted_entities_sql(),
                &deleted_entities_params(E::ENTITY_TYPE, window_start, window_end),
            )?
            .into_iter()
            .collect();

        let changed: BTreeSet<String> = self
            .run(
                &changed_entities_sql(&tables, variant),
                &changed_entities_params(
                    &tables,
                    variant,
                    &self.config.node_id,
                    &self.config.tenant_id,
                    window_start,
                    window_end,
                ),
            )?
            .into_iter()
            .collect();

        // A key both changed and deleted in-window ships as a delete only.
        let to_fetch: Vec<&String> = changed.difference(&deleted).collect();

        let new_or_updated_entities = if to_fetch.is_empty() {
            Vec::new()
        } else {
            let sql = fetch_entities_sql(&tables, E::select_columns(), to_fetch.len());
            let mut params: Vec<SqlValue> = vec![self.config.tenant_id.as_str().into()];
            params.extend(to_fetch.iter().map(|id| SqlValue::from(id.as_str())));
            let rows = self
                .executor
                .query(
                    &self.config.connection,
                    &sql,
                    &params,
                    self.config.max_rows,
                    self.config.query_timeout,
                )?
                .into_rows();

            let mut entities = Vec::with_capacity(rows.len());
            for row in rows.rows() {
                entities.push(E::from_row(&row)?);
            }
            entities
        };

        let envelope = DeltaEnvelope {
            entity_type: E::ENTITY_TYPE,
            increment_start: window_start,
            increment_end: window_end,
            bulk_sync,
            new_or_updated_entities,
            deleted_ids: deleted.into_iter().collect(),
        };

        info!(
            entity_type = %envelope.entity_type,
            node_id = %self.config.node_id,
            window_start,
            window_end,
            changed = envelope.new_or_updated_entities.len(),
            deleted = envelope.deleted_ids.len(),
            bulk_sync,
            "produced delta"
        );

        Ok(envelope)
    }

    /// Produces a bulk resync delta covering everything up to `window_end`.
    pub fn produce_bulk(&self, window_end: i64) -> SyncResult<DeltaEnvelope<E>> {
        self.produce(None, window_end)
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> SyncResult<Vec<String>> {
        let rows = self
            .executor
            .query(
                &self.config.connection,
                sql,
                params,
                self.config.max_rows,
                self.config.query_timeout,
            )?
            .into_rows();
        // Both id queries project a single uuid column.
        let column = if sql.contains("ENTITY_UUID") {
            "ENTITY_UUID"
        } else {
            "UUID"
        };
        Ok(rows.text_column(column))
    }
}
