//! Delta queries against the central store.
//!
//! Identifiers in every statement come from the whitelisted constants
//! below; values travel only through bound parameters.

use portalsync_protocol::EntityType;
use portalsync_store::{QueryExecutor, SqlValue};
use std::time::Duration;
use tracing::debug;

pub(crate) const TABLE_DELETED_ENTITY: &str = "DELETED_ENTITY";
pub(crate) const TABLE_TENANT_GATEWAY: &str = "TENANT_GATEWAY";
pub(crate) const TABLE_ACCOUNT_PLAN: &str = "ACCOUNT_PLAN";
pub(crate) const TABLE_PORTAL_CAPABILITY: &str = "PORTAL_CAPABILITY";

/// Capability row gating the plan-aware query shape.
pub(crate) const CAPABILITY_PLAN_SYNC: &str = "sync.plans";

/// Tables and columns backing one entity type.
pub(crate) struct EntityTables {
    /// Central entity table.
    pub entity_table: &'static str,
    /// Per-(node, entity) status table.
    pub status_table: &'static str,
    /// Column of `status_table` referencing the entity.
    pub status_fk: &'static str,
    /// TENANT_GATEWAY column holding the node's last sync time.
    pub sync_time_column: &'static str,
    /// TENANT_GATEWAY column holding the node's last sync log.
    pub sync_log_column: &'static str,
    /// Whether the entity joins the account-plan table.
    pub plan_join: bool,
}

pub(crate) fn tables_for(entity_type: EntityType) -> EntityTables {
    match entity_type {
        EntityType::Application => EntityTables {
            entity_table: "APPLICATION",
            status_table: "APPLICATION_TENANT_GATEWAY",
            status_fk: "APPLICATION_UUID",
            sync_time_column: "APP_SYNC_TIME",
            sync_log_column: "APP_SYNC_LOG",
            plan_join: true,
        },
        EntityType::ApiKey => EntityTables {
            entity_table: "API_KEY",
            status_table: "API_KEY_TENANT_GATEWAY",
            status_fk: "API_KEY_UUID",
            sync_time_column: "KEY_SYNC_TIME",
            sync_log_column: "KEY_SYNC_LOG",
            plan_join: false,
        },
    }
}

/// The changed-entity query shape for this round.
///
/// Two named variants behind one interface: the plan-aware shape joins the
/// account-plan table and carries two extra window parameters, so a plan
/// change in-window re-selects the owning application. The variant is
/// chosen once per round by [`QueryVariant::probe`], never per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVariant {
    /// Entity window plus errored-row re-selection.
    Basic,
    /// `Basic` plus the account-plan change window.
    PlanAware,
}

impl QueryVariant {
    /// Probes the central store's capability row.
    ///
    /// Anything other than a readable `true` selects `Basic`; a probe
    /// failure never fails the round because the basic shape is always
    /// valid.
    pub fn probe(executor: &dyn QueryExecutor, conn: &str, timeout: Duration) -> Self {
        let sql = format!("SELECT VALUE FROM {TABLE_PORTAL_CAPABILITY} WHERE NAME = ?");
        match executor.query(conn, &sql, &[CAPABILITY_PLAN_SYNC.into()], 1, timeout) {
            Ok(outcome) => {
                let rows = outcome.into_rows();
                let enabled = rows
                    .rows()
                    .next()
                    .and_then(|row| row.text("VALUE"))
                    .is_some_and(|value| value.eq_ignore_ascii_case("true"));
                if enabled {
                    QueryVariant::PlanAware
                } else {
                    QueryVariant::Basic
                }
            }
            Err(e) => {
                debug!(error = %e, "capability probe failed, using basic query shape");
                QueryVariant::Basic
            }
        }
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Deletion-log rows for one type inside (start, end].
pub(crate) fn deleted_entities_sql() -> String {
    format!(
        "SELECT ENTITY_UUID FROM {TABLE_DELETED_ENTITY} \
         WHERE TYPE = ? AND DELETED_TS > ? AND DELETED_TS <= ?"
    )
}

pub(crate) fn deleted_entities_params(
    entity_type: EntityType,
    window_start: i64,
    window_end: i64,
) -> Vec<SqlValue> {
    vec![
        entity_type.as_str().into(),
        window_start.into(),
        window_end.into(),
    ]
}

/// Entities changed inside (start, end], plus rows flagged errored for the
/// node so failed entities are retried every round.
pub(crate) fn changed_entities_sql(tables: &EntityTables, variant: QueryVariant) -> String {
    let entity = tables.entity_table;
    let status = tables.status_table;
    let fk = tables.status_fk;
    if variant == QueryVariant::PlanAware && tables.plan_join {
        format!(
            "SELECT a.UUID FROM {entity} a \
             LEFT JOIN {status} s ON s.{fk} = a.UUID AND s.TENANT_GATEWAY_UUID = ? \
             LEFT JOIN {TABLE_ACCOUNT_PLAN} p ON p.UUID = a.ACCOUNT_PLAN_UUID \
             WHERE a.TENANT_ID = ? AND ((a.MODIFY_TS > ? AND a.MODIFY_TS <= ?) \
             OR (p.MODIFY_TS > ? AND p.MODIFY_TS <= ?) OR s.SYNC_STATUS = 'ERROR')"
        )
    } else {
        format!(
            "SELECT a.UUID FROM {entity} a \
             LEFT JOIN {status} s ON s.{fk} = a.UUID AND s.TENANT_GATEWAY_UUID = ? \
             WHERE a.TENANT_ID = ? AND ((a.MODIFY_TS > ? AND a.MODIFY_TS <= ?) \
             OR s.SYNC_STATUS = 'ERROR')"
        )
    }
}

pub(crate) fn changed_entities_params(
    tables: &EntityTables,
    variant: QueryVariant,
    node_id: &str,
    tenant_id: &str,
    window_start: i64,
    window_end: i64,
) -> Vec<SqlValue> {
    let mut params = vec![
        node_id.into(),
        tenant_id.into(),
        window_start.into(),
        window_end.into(),
    ];
    if variant == QueryVariant::PlanAware && tables.plan_join {
        params.push(window_start.into());
        params.push(window_end.into());
    }
    params
}

/// Full entity rows for a set of changed uuids.
pub(crate) fn fetch_entities_sql(tables: &EntityTables, columns: &str, count: usize) -> String {
    format!(
        "SELECT {columns} FROM {entity} WHERE TENANT_ID = ? AND UUID IN ({marks})",
        entity = tables.entity_table,
        marks = placeholders(count)
    )
}

/// Node bookkeeping: last sync time + log, keyed by node uuid.
pub(crate) fn node_bookkeeping_sql(tables: &EntityTables) -> String {
    format!(
        "UPDATE {TABLE_TENANT_GATEWAY} SET {time} = ?, {log} = ? WHERE UUID = ?",
        time = tables.sync_time_column,
        log = tables.sync_log_column,
    )
}

/// Existing per-(node, entity) status rows among a candidate set.
pub(crate) fn existing_status_rows_sql(tables: &EntityTables, count: usize) -> String {
    format!(
        "SELECT {fk} FROM {status} WHERE TENANT_GATEWAY_UUID = ? AND {fk} IN ({marks})",
        fk = tables.status_fk,
        status = tables.status_table,
        marks = placeholders(count)
    )
}

/// One batched status update for already-present rows.
pub(crate) fn update_status_rows_sql(tables: &EntityTables, count: usize) -> String {
    format!(
        "UPDATE {status} SET SYNC_STATUS = ?, SYNC_TIME = ?, SYNC_LOG = ? \
         WHERE TENANT_GATEWAY_UUID = ? AND {fk} IN ({marks})",
        status = tables.status_table,
        fk = tables.status_fk,
        marks = placeholders(count)
    )
}

/// Status update for a single row (error upsert path).
pub(crate) fn update_status_row_sql(tables: &EntityTables) -> String {
    format!(
        "UPDATE {status} SET SYNC_STATUS = ?, SYNC_TIME = ?, SYNC_LOG = ? \
         WHERE TENANT_GATEWAY_UUID = ? AND {fk} = ?",
        status = tables.status_table,
        fk = tables.status_fk,
    )
}

/// Status insert for a row seen for the first time.
pub(crate) fn insert_status_row_sql(tables: &EntityTables) -> String {
    format!(
        "INSERT INTO {status} (TENANT_GATEWAY_UUID, {fk}, SYNC_STATUS, SYNC_TIME, SYNC_LOG) \
         VALUES (?, ?, ?, ?, ?)",
        status = tables.status_table,
        fk = tables.status_fk,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use portalsync_store::{MockExecutor, QueryOutcome, RowSet, StoreError};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn capability_rows(value: &str) -> QueryOutcome {
        let mut rows = RowSet::new(vec!["VALUE".into()]);
        rows.push_row(vec![value.into()]);
        QueryOutcome::Rows(rows)
    }

    #[test]
    fn probe_selects_plan_aware_when_enabled() {
        let mock = MockExecutor::new();
        mock.on_prefix("SELECT VALUE FROM PORTAL_CAPABILITY", capability_rows("true"));
        assert_eq!(
            QueryVariant::probe(&mock, "central", TIMEOUT),
            QueryVariant::PlanAware
        );
    }

    #[test]
    fn probe_defaults_to_basic() {
        let mock = MockExecutor::new();
        mock.on_prefix("SELECT VALUE FROM PORTAL_CAPABILITY", capability_rows("false"));
        assert_eq!(
            QueryVariant::probe(&mock, "central", TIMEOUT),
            QueryVariant::Basic
        );

        // Missing row.
        let mock = MockExecutor::new();
        mock.on_prefix(
            "SELECT VALUE FROM PORTAL_CAPABILITY",
            QueryOutcome::Rows(RowSet::new(vec!["VALUE".into()])),
        );
        assert_eq!(
            QueryVariant::probe(&mock, "central", TIMEOUT),
            QueryVariant::Basic
        );

        // Probe failure never fails the round.
        let mock = MockExecutor::new();
        mock.fail_prefix("SELECT VALUE", StoreError::transient("no such table"));
        assert_eq!(
            QueryVariant::probe(&mock, "central", TIMEOUT),
            QueryVariant::Basic
        );
    }

    #[test]
    fn variants_differ_in_parameter_count() {
        let tables = tables_for(EntityType::Application);
        let basic = changed_entities_params(&tables, QueryVariant::Basic, "n", "t", 100, 200);
        let plan = changed_entities_params(&tables, QueryVariant::PlanAware, "n", "t", 100, 200);
        assert_eq!(basic.len(), 4);
        assert_eq!(plan.len(), 6);

        assert!(!changed_entities_sql(&tables, QueryVariant::Basic).contains(TABLE_ACCOUNT_PLAN));
        assert!(changed_entities_sql(&tables, QueryVariant::PlanAware).contains(TABLE_ACCOUNT_PLAN));
    }

    #[test]
    fn api_keys_never_join_plans() {
        let tables = tables_for(EntityType::ApiKey);
        let sql = changed_entities_sql(&tables, QueryVariant::PlanAware);
        assert!(!sql.contains(TABLE_ACCOUNT_PLAN));
        let params = changed_entities_params(&tables, QueryVariant::PlanAware, "n", "t", 0, 1);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn statement_shapes() {
        let tables = tables_for(EntityType::Application);
        assert_eq!(
            deleted_entities_sql(),
            "SELECT ENTITY_UUID FROM DELETED_ENTITY WHERE TYPE = ? AND DELETED_TS > ? AND DELETED_TS <= ?"
        );
        assert_eq!(
            node_bookkeeping_sql(&tables),
            "UPDATE TENANT_GATEWAY SET APP_SYNC_TIME = ?, APP_SYNC_LOG = ? WHERE UUID = ?"
        );
        assert!(existing_status_rows_sql(&tables, 3).ends_with("IN (?, ?, ?)"));
        assert!(update_status_rows_sql(&tables, 2).contains("APPLICATION_UUID IN (?, ?)"));
    }
}
