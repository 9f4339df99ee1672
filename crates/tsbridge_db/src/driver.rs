//! Driver abstraction.
//!
//! A `Driver` opens physical sessions for a connection string. Sessions run
//! raw SQL and hand back a `RowCursor` that yields column names and then rows
//! of `DbValue`. Typing of the values is left to the caller.

use std::collections::VecDeque;

use crate::connection_string::ConnectionString;
use crate::error::DbError;
use crate::value::DbRow;

/// Opens physical sessions.
pub trait Driver: Send + Sync + 'static {
    type Connection: Connection;

    /// Short backend name used in logs and error messages.
    fn name(&self) -> &'static str;

    fn connect(&self, conn_str: &ConnectionString) -> Result<Self::Connection, DbError>;

    /// Statement returning the server's current timestamp in a single row.
    fn probe_sql(&self) -> &'static str;
}

/// One physical session. Dropping it closes the session.
pub trait Connection: Send + 'static {
    /// Run `sql` verbatim and return a cursor over its result set.
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DbError>;
}

/// Forward-only view over a result set.
pub trait RowCursor {
    /// Column names in result-set order.
    fn columns(&mut self) -> Result<Vec<String>, DbError>;

    /// The next row, or `None` once the result set is exhausted.
    fn next_row(&mut self) -> Result<Option<DbRow>, DbError>;
}

/// Cursor over a result set that was read eagerly.
#[derive(Debug, Clone, Default)]
pub struct BufferedCursor {
    columns: Vec<String>,
    rows: VecDeque<DbRow>,
}

impl BufferedCursor {
    pub fn new(columns: Vec<String>, rows: Vec<DbRow>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowCursor for BufferedCursor {
    fn columns(&mut self) -> Result<Vec<String>, DbError> {
        Ok(self.columns.clone())
    }

    fn next_row(&mut self) -> Result<Option<DbRow>, DbError> {
        Ok(self.rows.pop_front())
    }
}
