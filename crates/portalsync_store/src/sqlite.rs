//! SQLite-backed query executor.

use crate::error::{StoreError, StoreResult};
use crate::query::{QueryExecutor, QueryOutcome, RowSet, SqlValue};
use parking_lot::{Mutex, RwLock};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ToSql};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Long(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Double(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> StoreResult<SqlValue> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(v) => Ok(SqlValue::Long(v)),
        ValueRef::Real(v) => Ok(SqlValue::Double(v)),
        ValueRef::Text(bytes) => Ok(SqlValue::Text(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        ValueRef::Blob(_) => Err(StoreError::transient("unsupported column type: BLOB")),
    }
}

/// A [`QueryExecutor`] over a registry of named SQLite connections.
///
/// Each connection is serialized behind its own mutex; callers on
/// different connections never contend.
pub struct SqliteExecutor {
    connections: RwLock<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl SqliteExecutor {
    /// Creates an executor with no registered connections.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an already-open connection under `name`.
    pub fn register(&self, name: impl Into<String>, conn: Connection) {
        self.connections
            .write()
            .insert(name.into(), Arc::new(Mutex::new(conn)));
    }

    /// Opens an in-memory database and registers it under `name`.
    pub fn open_in_memory(&self, name: impl Into<String>) -> StoreResult<()> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::transient(format!("failed to open database: {e}")))?;
        self.register(name, conn);
        Ok(())
    }

    /// Opens (or creates) a file-backed database and registers it under `name`.
    pub fn open_file(&self, name: impl Into<String>, path: &Path) -> StoreResult<()> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::transient(format!("failed to open database: {e}")))?;
        self.register(name, conn);
        Ok(())
    }

    fn connection(&self, name: &str) -> StoreResult<Arc<Mutex<Connection>>> {
        self.connections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownConnection {
                name: name.to_string(),
            })
    }
}

impl Default for SqliteExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor for SqliteExecutor {
    fn query(
        &self,
        conn: &str,
        sql: &str,
        params: &[SqlValue],
        max_rows: usize,
        timeout: Duration,
    ) -> StoreResult<QueryOutcome> {
        let connection = self.connection(conn)?;
        let guard = connection.lock();

        guard
            .busy_timeout(timeout)
            .map_err(|e| StoreError::transient(format!("failed to set busy timeout: {e}")))?;

        let is_select = sql
            .trim_start()
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("select"));

        if is_select {
            let mut stmt = guard
                .prepare(sql)
                .map_err(|e| StoreError::transient(format!("failed to prepare query: {e}")))?;
            let columns: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();

            let mut result = RowSet::new(columns.clone());
            let mut rows = stmt
                .query(rusqlite::params_from_iter(params.iter()))
                .map_err(|e| StoreError::transient(format!("query failed: {e}")))?;

            while let Some(row) = rows
                .next()
                .map_err(|e| StoreError::transient(format!("row fetch failed: {e}")))?
            {
                // max_rows is a cutoff, not a truncation: past the bound the
                // whole operation fails and is retried next round.
                if max_rows > 0 && result.len() == max_rows {
                    return Err(StoreError::transient(format!(
                        "result exceeded row limit {max_rows}"
                    )));
                }
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    let value = row
                        .get_ref(i)
                        .map_err(|e| StoreError::transient(format!("column read failed: {e}")))?;
                    values.push(value_from_ref(value)?);
                }
                result.push_row(values);
            }

            Ok(QueryOutcome::Rows(result))
        } else {
            let affected = guard
                .execute(sql, rusqlite::params_from_iter(params.iter()))
                .map_err(|e| StoreError::transient(format!("statement failed: {e}")))?;
            Ok(QueryOutcome::Updated(affected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn executor_with_table() -> SqliteExecutor {
        let executor = SqliteExecutor::new();
        executor.open_in_memory("central").unwrap();
        executor
            .query(
                "central",
                "CREATE TABLE ITEM (UUID TEXT PRIMARY KEY, MODIFY_TS INTEGER)",
                &[],
                0,
                TIMEOUT,
            )
            .unwrap();
        executor
    }

    #[test]
    fn unknown_connection_is_typed() {
        let executor = SqliteExecutor::new();
        let err = executor
            .query("nope", "SELECT 1", &[], 0, TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownConnection { .. }));
    }

    #[test]
    fn insert_select_roundtrip() {
        let executor = executor_with_table();
        let inserted = executor
            .query(
                "central",
                "INSERT INTO ITEM (UUID, MODIFY_TS) VALUES (?, ?)",
                &[SqlValue::Text("a1".into()), SqlValue::Long(100)],
                0,
                TIMEOUT,
            )
            .unwrap()
            .updated();
        assert_eq!(inserted, 1);

        let rows = executor
            .query(
                "central",
                "SELECT UUID, MODIFY_TS FROM ITEM WHERE MODIFY_TS > ?",
                &[SqlValue::Long(50)],
                0,
                TIMEOUT,
            )
            .unwrap()
            .into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.text_column("UUID"), vec!["a1"]);
    }

    #[test]
    fn row_limit_fails_the_operation() {
        let executor = executor_with_table();
        for i in 0..3 {
            executor
                .query(
                    "central",
                    "INSERT INTO ITEM (UUID, MODIFY_TS) VALUES (?, ?)",
                    &[SqlValue::Text(format!("a{i}")), SqlValue::Long(i)],
                    0,
                    TIMEOUT,
                )
                .unwrap();
        }

        let err = executor
            .query("central", "SELECT UUID FROM ITEM", &[], 2, TIMEOUT)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn null_parameters_bind() {
        let executor = executor_with_table();
        executor
            .query(
                "central",
                "INSERT INTO ITEM (UUID, MODIFY_TS) VALUES (?, ?)",
                &[SqlValue::Text("a1".into()), SqlValue::Null],
                0,
                TIMEOUT,
            )
            .unwrap();

        let rows = executor
            .query(
                "central",
                "SELECT MODIFY_TS FROM ITEM WHERE UUID = ?",
                &[SqlValue::Text("a1".into())],
                0,
                TIMEOUT,
            )
            .unwrap()
            .into_rows();
        assert_eq!(rows.rows().next().unwrap().get("MODIFY_TS"), Some(&SqlValue::Null));
    }

    #[test]
    fn file_backed_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.db");

        let executor = SqliteExecutor::new();
        executor.open_file("central", &path).unwrap();
        executor
            .query("central", "CREATE TABLE ITEM (UUID TEXT)", &[], 0, TIMEOUT)
            .unwrap();
        executor
            .query(
                "central",
                "INSERT INTO ITEM (UUID) VALUES (?)",
                &[SqlValue::Text("a1".into())],
                0,
                TIMEOUT,
            )
            .unwrap();
        drop(executor);

        // Reopen and read back.
        let executor = SqliteExecutor::new();
        executor.open_file("central", &path).unwrap();
        let rows = executor
            .query("central", "SELECT UUID FROM ITEM", &[], 0, TIMEOUT)
            .unwrap()
            .into_rows();
        assert_eq!(rows.len(), 1);
    }
}
