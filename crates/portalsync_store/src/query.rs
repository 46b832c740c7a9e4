//! Relational query abstraction.
//!
//! The central store is reached through a single entry point that takes a
//! named connection, parameterized SQL and a bound parameter list, and
//! returns either a result set or an affected-row count. Identifiers in the
//! SQL always come from whitelisted constants; values travel only through
//! the parameter list.

use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::time::Duration;

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Long(i64),
    /// Double-precision float.
    Double(f64),
    /// Text.
    Text(String),
    /// Boolean (stored as 0/1 by integer backends).
    Bool(bool),
}

impl SqlValue {
    /// Returns the value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            SqlValue::Long(v) => Some(*v),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Long(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// A result set: column names plus row-major values.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    /// Creates an empty result set with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row. The value count must match the column count.
    pub fn push_row(&mut self, row: Vec<SqlValue>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over the rows.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Collects one column as text values, skipping NULLs.
    ///
    /// Column lookup is case-insensitive, matching backends that fold
    /// identifier case.
    pub fn text_column(&self, column: &str) -> Vec<String> {
        self.rows()
            .filter_map(|row| row.text(column).map(str::to_string))
            .collect()
    }
}

/// A borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

impl<'a> Row<'a> {
    /// Returns the value in the named column, if present.
    pub fn get(&self, column: &str) -> Option<&'a SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    /// Returns the named column as text.
    pub fn text(&self, column: &str) -> Option<&'a str> {
        self.get(column).and_then(SqlValue::as_text)
    }

    /// Returns the named column as an integer.
    pub fn long(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_long)
    }
}

/// Maps a result row to a typed value.
pub trait FromRow: Sized {
    /// Builds `Self` from a row.
    fn from_row(row: &Row<'_>) -> StoreResult<Self>;
}

/// Outcome of a query: rows for a SELECT, an affected count otherwise.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// Result set of a SELECT.
    Rows(RowSet),
    /// Affected-row count of an UPDATE/INSERT/DELETE.
    Updated(usize),
}

impl QueryOutcome {
    /// Returns the result set, treating an update count as no rows.
    pub fn into_rows(self) -> RowSet {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Updated(_) => RowSet::default(),
        }
    }

    /// Returns the affected-row count, treating rows as zero.
    pub fn updated(&self) -> usize {
        match self {
            QueryOutcome::Rows(_) => 0,
            QueryOutcome::Updated(n) => *n,
        }
    }
}

/// Executes parameterized queries against a named relational connection.
pub trait QueryExecutor: Send + Sync {
    /// Runs one statement.
    ///
    /// `max_rows` caps the result set (0 = unbounded); `timeout` bounds the
    /// whole call. After either cutoff the operation fails wholesale and is
    /// retried next round.
    fn query(
        &self,
        conn: &str,
        sql: &str,
        params: &[SqlValue],
        max_rows: usize,
        timeout: Duration,
    ) -> StoreResult<QueryOutcome>;
}

/// One recorded call against a [`MockExecutor`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Connection reference.
    pub conn: String,
    /// The SQL text.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<SqlValue>,
}

/// A scriptable executor for tests.
///
/// Responses are matched by SQL prefix, first match wins. Unmatched
/// statements return an empty update.
pub struct MockExecutor {
    responses: Mutex<Vec<(String, StoreResult<QueryOutcome>)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockExecutor {
    /// Creates an executor with no scripted responses.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts an outcome for statements starting with `prefix`.
    pub fn on_prefix(&self, prefix: impl Into<String>, outcome: QueryOutcome) {
        self.responses.lock().push((prefix.into(), Ok(outcome)));
    }

    /// Scripts a failure for statements starting with `prefix`.
    pub fn fail_prefix(&self, prefix: impl Into<String>, error: StoreError) {
        self.responses.lock().push((prefix.into(), Err(error)));
    }

    /// Returns all recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns recorded calls whose SQL starts with `prefix`.
    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.sql.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor for MockExecutor {
    fn query(
        &self,
        conn: &str,
        sql: &str,
        params: &[SqlValue],
        _max_rows: usize,
        _timeout: Duration,
    ) -> StoreResult<QueryOutcome> {
        self.calls.lock().push(RecordedCall {
            conn: conn.to_string(),
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let responses = self.responses.lock();
        for (prefix, outcome) in responses.iter() {
            if sql.starts_with(prefix.as_str()) {
                return outcome.clone();
            }
        }
        Ok(QueryOutcome::Updated(0))
    }
}
