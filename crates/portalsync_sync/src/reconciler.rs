//! Postback reconciliation against the central store.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::queries::{
    changed_entities_params, changed_entities_sql, deleted_entities_params, deleted_entities_sql,
    existing_status_rows_sql, insert_status_row_sql, node_bookkeeping_sql, tables_for,
    update_status_row_sql, update_status_rows_sql, EntityTables, QueryVariant,
};
use crate::state::{STATUS_ERROR, STATUS_SYNCED};
use portalsync_protocol::PostbackEnvelope;
use portalsync_store::{QueryExecutor, QueryOutcome, SqlValue};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::info;

/// Row counts of one reconciled postback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entities marked synced.
    pub synced: usize,
    /// Entities marked errored.
    pub errored: usize,
}

/// Applies a node's postback to the central sync bookkeeping.
///
/// Every write is an upsert, so re-delivering the same postback changes
/// no row counts. Node-level bookkeeping is updated even when the
/// postback reports errors: the producer never retries the full window,
/// only the flagged entities.
pub struct PostbackReconciler {
    executor: Arc<dyn QueryExecutor>,
    config: SyncConfig,
}

impl PostbackReconciler {
    /// Creates a reconciler over the given executor.
    pub fn new(executor: Arc<dyn QueryExecutor>, config: SyncConfig) -> Self {
        Self { executor, config }
    }

    /// Reconciles one postback inside a single transaction.
    pub fn reconcile(&self, postback: &PostbackEnvelope) -> SyncResult<ReconcileReport> {
        // Structural failures reject the round before any bookkeeping change.
        postback.validate()?;

        let tables = tables_for(postback.entity_type);
        // A bulk resync acknowledged everything from time zero.
        let window_start = if postback.bulk_sync {
            0
        } else {
            postback.increment_start
        };

        self.run_statement("BEGIN", &[])?;
        match self.reconcile_in_txn(postback, &tables, window_start) {
            Ok(report) => {
                self.run_statement("COMMIT", &[])?;
                info!(
                    entity_type = %postback.entity_type,
                    node_id = %self.config.node_id,
                    synced = report.synced,
                    errored = report.errored,
                    "reconciled postback"
                );
                Ok(report)
            }
            Err(e) => {
                let _ = self.run_statement("ROLLBACK", &[]);
                Err(e)
            }
        }
    }

    fn reconcile_in_txn(
        &self,
        postback: &PostbackEnvelope,
        tables: &EntityTables,
        window_start: i64,
    ) -> SyncResult<ReconcileReport> {
        let window_end = postback.increment_end;

        // Node bookkeeping comes first and is unconditional.
        let sync_log = postback
            .sync_log
            .clone()
            .unwrap_or_else(|| format!("status {:?}", postback.increment_status));
        let affected = self
            .run_statement(
                &node_bookkeeping_sql(tables),
                &[
                    window_end.into(),
                    sync_log.into(),
                    self.config.node_id.as_str().into(),
                ],
            )?
            .updated();
        if affected == 0 {
            return Err(SyncError::UnknownNode {
                node_id: self.config.node_id.clone(),
            });
        }

        // The success set is re-derived from a fresh window query, minus
        // the ids the node reported failed.
        let variant = QueryVariant::probe(
            &*self.executor,
            &self.config.connection,
            self.config.query_timeout,
        );
        let changed = self
            .run_statement(
                &changed_entities_sql(tables, variant),
                &changed_entities_params(
                    tables,
                    variant,
                    &self.config.node_id,
                    &self.config.tenant_id,
                    window_start,
                    window_end,
                ),
            )?
            .into_rows()
            .text_column("UUID");
        let deleted = self
            .run_statement(
                &deleted_entities_sql(),
                &deleted_entities_params(postback.entity_type, window_start, window_end),
            )?
            .into_rows()
            .text_column("ENTITY_UUID");

        let error_ids: HashSet<&str> = postback.error_ids().into_iter().collect();
        let success: Vec<String> = changed
            .into_iter()
            .chain(deleted)
            .collect::<BTreeSet<String>>()
            .into_iter()
            .filter(|id| !error_ids.contains(id.as_str()))
            .collect();

        let synced = self.upsert_success_rows(tables, &success, window_end)?;
        let errored = self.upsert_error_rows(tables, postback, window_end)?;

        Ok(ReconcileReport { synced, errored })
    }

    /// Marks the success set synced: one batched UPDATE for rows that
    /// exist, INSERTs for the rest.
    fn upsert_success_rows(
        &self,
        tables: &EntityTables,
        success: &[String],
        window_end: i64,
    ) -> SyncResult<usize> {
        if success.is_empty() {
            return Ok(0);
        }

        let mut params: Vec<SqlValue> = vec![self.config.node_id.as_str().into()];
        params.extend(success.iter().map(|id| SqlValue::from(id.as_str())));
        let existing: HashSet<String> = self
            .run_statement(&existing_status_rows_sql(tables, success.len()), &params)?
            .into_rows()
            .text_column(tables.status_fk)
            .into_iter()
            .collect();

        let (to_update, to_insert): (Vec<&String>, Vec<&String>) =
            success.iter().partition(|id| existing.contains(*id));

        if !to_update.is_empty() {
            let mut params: Vec<SqlValue> = vec![
                STATUS_SYNCED.into(),
                window_end.into(),
                SqlValue::Null,
                self.config.node_id.as_str().into(),
            ];
            params.extend(to_update.iter().map(|id| SqlValue::from(id.as_str())));
            self.run_statement(&update_status_rows_sql(tables, to_update.len()), &params)?;
        }

        for id in to_insert {
            self.run_statement(
                &insert_status_row_sql(tables),
                &[
                    self.config.node_id.as_str().into(),
                    id.as_str().into(),
                    STATUS_SYNCED.into(),
                    window_end.into(),
                    SqlValue::Null,
                ],
            )?;
        }

        Ok(success.len())
    }

    /// Upserts an error row per reported failure so the latest message and
    /// timestamp are retained and the entity is re-selected next round.
    fn upsert_error_rows(
        &self,
        tables: &EntityTables,
        postback: &PostbackEnvelope,
        window_end: i64,
    ) -> SyncResult<usize> {
        for entity_error in &postback.entity_errors {
            let updated = self
                .run_statement(
                    &update_status_row_sql(tables),
                    &[
                        STATUS_ERROR.into(),
                        window_end.into(),
                        entity_error.msg.as_str().into(),
                        self.config.node_id.as_str().into(),
                        entity_error.id.as_str().into(),
                    ],
                )?
                .updated();
            if updated == 0 {
                self.run_statement(
                    &insert_status_row_sql(tables),
                    &[
                        self.config.node_id.as_str().into(),
                        entity_error.id.as_str().into(),
                        STATUS_ERROR.into(),
                        window_end.into(),
                        entity_error.msg.as_str().into(),
                    ],
                )?;
            }
        }
        Ok(postback.entity_errors.len())
    }

    fn run_statement(&self, sql: &str, params: &[SqlValue]) -> SyncResult<QueryOutcome> {
        Ok(self.executor.query(
            &self.config.connection,
            sql,
            params,
            self.config.max_rows,
            self.config.query_timeout,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portalsync_protocol::{EntityError, EntityType};
    use portalsync_store::{MockExecutor, RowSet, StoreError};

    fn id_rows(column: &str, ids: &[&str]) -> QueryOutcome {
        let mut rows = RowSet::new(vec![column.into()]);
        for id in ids {
            rows.push_row(vec![SqlValue::Text((*id).into())]);
        }
        QueryOutcome::Rows(rows)
    }

    fn reconciler(mock: Arc<MockExecutor>) -> PostbackReconciler {
        PostbackReconciler::new(mock, SyncConfig::new("central", "tenant-1", "node-1"))
    }

    fn script_happy_path(mock: &MockExecutor) {
        mock.on_prefix("UPDATE TENANT_GATEWAY", QueryOutcome::Updated(1));
        mock.on_prefix("SELECT a.UUID FROM APPLICATION", id_rows("UUID", &[]));
        mock.on_prefix("SELECT ENTITY_UUID", id_rows("ENTITY_UUID", &[]));
    }

    #[test]
    fn bookkeeping_updates_even_on_error_postback() {
        let mock = Arc::new(MockExecutor::new());
        script_happy_path(&mock);

        let postback = PostbackEnvelope::error(
            EntityType::Application,
            100,
            200,
            "round failed",
            vec![],
        )
        .with_sync_log("{\"count\":\"0\"}");
        reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap();

        let bookkeeping = mock.calls_with_prefix("UPDATE TENANT_GATEWAY");
        assert_eq!(bookkeeping.len(), 1);
        assert_eq!(bookkeeping[0].params[0], SqlValue::Long(200));
        assert_eq!(
            bookkeeping[0].params[1],
            SqlValue::Text("{\"count\":\"0\"}".into())
        );
        assert_eq!(bookkeeping[0].params[2], SqlValue::Text("node-1".into()));
    }

    #[test]
    fn zero_bookkeeping_rows_fails_the_round() {
        let mock = Arc::new(MockExecutor::new());
        mock.on_prefix("UPDATE TENANT_GATEWAY", QueryOutcome::Updated(0));

        let postback = PostbackEnvelope::ok(EntityType::Application, 100, 200);
        let err = reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap_err();
        assert!(matches!(err, SyncError::UnknownNode { .. }));

        // The transaction rolled back.
        assert_eq!(mock.calls_with_prefix("ROLLBACK").len(), 1);
        assert!(mock.calls_with_prefix("COMMIT").is_empty());
    }

    #[test]
    fn success_rows_are_batched_update_plus_inserts() {
        let mock = Arc::new(MockExecutor::new());
        mock.on_prefix("UPDATE TENANT_GATEWAY", QueryOutcome::Updated(1));
        mock.on_prefix(
            "SELECT a.UUID FROM APPLICATION",
            id_rows("UUID", &["update1", "insert1", "errored1"]),
        );
        mock.on_prefix(
            "SELECT ENTITY_UUID",
            id_rows("ENTITY_UUID", &["updatedelete1", "insertdelete2"]),
        );
        mock.on_prefix(
            "SELECT APPLICATION_UUID FROM APPLICATION_TENANT_GATEWAY",
            id_rows("APPLICATION_UUID", &["update1", "updatedelete1"]),
        );
        mock.on_prefix("UPDATE APPLICATION_TENANT_GATEWAY", QueryOutcome::Updated(2));
        mock.on_prefix("INSERT INTO APPLICATION_TENANT_GATEWAY", QueryOutcome::Updated(1));

        let postback = PostbackEnvelope::partial(
            EntityType::Application,
            100,
            200,
            vec![EntityError {
                id: "errored1".into(),
                msg: "boom".into(),
            }],
        );
        let report = reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap();

        // 4 successes (errored1 excluded), 1 error row.
        assert_eq!(report, ReconcileReport { synced: 4, errored: 1 });

        // One batched update for the two existing rows.
        let updates = mock.calls_with_prefix("UPDATE APPLICATION_TENANT_GATEWAY");
        let batched: Vec<_> = updates.iter().filter(|c| c.sql.contains("IN (")).collect();
        assert_eq!(batched.len(), 1);
        assert_eq!(
            batched[0].params[0],
            SqlValue::Text(STATUS_SYNCED.into())
        );

        // Inserts for the two unseen success rows only; the error row hit
        // the scripted update so no insert follows for it.
        let inserts = mock.calls_with_prefix("INSERT INTO APPLICATION_TENANT_GATEWAY");
        assert_eq!(inserts.len(), 2);
        let inserted_ids: Vec<&SqlValue> = inserts.iter().map(|c| &c.params[1]).collect();
        assert!(inserted_ids.contains(&&SqlValue::Text("insert1".into())));
        assert!(inserted_ids.contains(&&SqlValue::Text("insertdelete2".into())));

        assert_eq!(mock.calls_with_prefix("COMMIT").len(), 1);
    }

    #[test]
    fn error_rows_update_if_present_else_insert() {
        let mock = Arc::new(MockExecutor::new());
        script_happy_path(&mock);
        // First UPDATE hits (existing error row), so the prefix matches a
        // scripted single-row response; the mock can only hold one script
        // per prefix, so run the two cases separately.
        mock.on_prefix("UPDATE APPLICATION_TENANT_GATEWAY", QueryOutcome::Updated(1));

        let postback = PostbackEnvelope::partial(
            EntityType::Application,
            100,
            200,
            vec![EntityError {
                id: "errorEntityWillBeUpdated".into(),
                msg: "log error".into(),
            }],
        );
        reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap();
        assert!(mock
            .calls_with_prefix("INSERT INTO APPLICATION_TENANT_GATEWAY")
            .is_empty());

        // Unknown row: the update misses and an insert follows.
        let mock = Arc::new(MockExecutor::new());
        script_happy_path(&mock);
        mock.on_prefix("UPDATE APPLICATION_TENANT_GATEWAY", QueryOutcome::Updated(0));
        mock.on_prefix("INSERT INTO APPLICATION_TENANT_GATEWAY", QueryOutcome::Updated(1));

        let postback = PostbackEnvelope::partial(
            EntityType::Application,
            100,
            200,
            vec![EntityError {
                id: "errorEntityWillBeInserted".into(),
                msg: "log error".into(),
            }],
        );
        reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap();

        let inserts = mock.calls_with_prefix("INSERT INTO APPLICATION_TENANT_GATEWAY");
        assert_eq!(inserts.len(), 1);
        assert_eq!(
            inserts[0].params[1],
            SqlValue::Text("errorEntityWillBeInserted".into())
        );
        assert_eq!(inserts[0].params[2], SqlValue::Text(STATUS_ERROR.into()));
        assert_eq!(inserts[0].params[4], SqlValue::Text("log error".into()));
    }

    #[test]
    fn bulk_sync_forces_window_start_to_zero() {
        let mock = Arc::new(MockExecutor::new());
        script_happy_path(&mock);

        let postback =
            PostbackEnvelope::ok(EntityType::Application, 1234, 235324).with_bulk_sync(true);
        reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap();

        let changed = mock.calls_with_prefix("SELECT a.UUID");
        assert_eq!(changed[0].params[2], SqlValue::Long(0));
        let deleted = mock.calls_with_prefix("SELECT ENTITY_UUID");
        assert_eq!(deleted[0].params[1], SqlValue::Long(0));
    }

    #[test]
    fn executor_failure_rolls_back() {
        let mock = Arc::new(MockExecutor::new());
        mock.on_prefix("UPDATE TENANT_GATEWAY", QueryOutcome::Updated(1));
        mock.fail_prefix("SELECT a.UUID", StoreError::transient("jdbc error"));

        let postback = PostbackEnvelope::ok(EntityType::Application, 100, 200);
        let err = reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(mock.calls_with_prefix("ROLLBACK").len(), 1);
    }

    #[test]
    fn invalid_postback_touches_nothing() {
        let mock = Arc::new(MockExecutor::new());
        let mut postback = PostbackEnvelope::ok(EntityType::Application, 100, 200);
        postback.increment_status = portalsync_protocol::SyncStatus::Error;

        let err = reconciler(Arc::clone(&mock)).reconcile(&postback).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(mock.calls().is_empty());
    }
}
