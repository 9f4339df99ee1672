//! Scripted driver.
//!
//! Every SQL text maps to a `Script` describing what the session returns or
//! where it fails. The driver counts sessions opened and closed so tests can
//! assert that every lease was released.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use tsbridge_db::{Connection, ConnectionString, DbError, DbRow, DbValue, Driver, RowCursor};

/// Probe statement answered by default with one timestamp row.
pub const SCRIPTED_PROBE_SQL: &str = "select current timestamp from sysibm.sysdummy1";

/// Callback run with the zero-based row index just before a row is handed out.
pub type RowHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Outcome of running one SQL text.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return these columns and rows.
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<DbValue>>,
    },
    /// Fail while executing the statement.
    ExecuteError(String),
    /// Execute, then fail while reading column metadata.
    ColumnsError(String),
    /// Yield `after` rows, then fail fetching the next one.
    RowError {
        columns: Vec<String>,
        rows: Vec<Vec<DbValue>>,
        after: usize,
        message: String,
    },
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<HashMap<String, Script>>,
    row_hooks: Mutex<HashMap<String, RowHook>>,
    connect_failure: Mutex<Option<String>>,
    executed: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory `Driver` with scripted results. Clones share state.
#[derive(Clone)]
pub struct ScriptedDriver {
    shared: Arc<Shared>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedDriver")
            .field("connects", &self.connects())
            .field("closes", &self.closes())
            .finish()
    }
}

impl ScriptedDriver {
    pub fn new() -> Self {
        let driver = Self {
            shared: Arc::new(Shared::default()),
        };
        driver.script_rows(
            SCRIPTED_PROBE_SQL,
            &["1"],
            vec![vec![DbValue::Timestamp(
                tsbridge_db::DbTimestamp::from_unix_micros(1_704_067_200_000_000)
                    .unwrap_or_else(tsbridge_db::DbTimestamp::now),
            )]],
        );
        driver
    }

    pub fn script(&self, sql: &str, script: Script) {
        lock(&self.shared.scripts).insert(sql.to_string(), script);
    }

    pub fn script_rows(&self, sql: &str, columns: &[&str], rows: Vec<Vec<DbValue>>) {
        self.script(
            sql,
            Script::Rows {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
    }

    pub fn script_execute_error(&self, sql: &str, message: &str) {
        self.script(sql, Script::ExecuteError(message.to_string()));
    }

    pub fn script_columns_error(&self, sql: &str, message: &str) {
        self.script(sql, Script::ColumnsError(message.to_string()));
    }

    pub fn script_row_error(
        &self,
        sql: &str,
        columns: &[&str],
        rows: Vec<Vec<DbValue>>,
        after: usize,
        message: &str,
    ) {
        self.script(
            sql,
            Script::RowError {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                after,
                message: message.to_string(),
            },
        );
    }

    /// Run `hook` for every row `sql` yields, e.g. to cancel or stall a batch mid-scan.
    pub fn on_row(&self, sql: &str, hook: impl Fn(usize) + Send + Sync + 'static) {
        lock(&self.shared.row_hooks).insert(sql.to_string(), Arc::new(hook));
    }

    /// Make every subsequent connect fail with `message`.
    pub fn fail_connect(&self, message: &str) {
        *lock(&self.shared.connect_failure) = Some(message.to_string());
    }

    pub fn allow_connect(&self) {
        *lock(&self.shared.connect_failure) = None;
    }

    /// Physical sessions opened so far.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Physical sessions closed so far.
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Sessions currently open (idle or leased).
    pub fn live_connections(&self) -> usize {
        self.connects().saturating_sub(self.closes())
    }

    /// Every SQL text executed, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.shared.executed).clone()
    }

    pub fn executed_count(&self, sql: &str) -> usize {
        lock(&self.shared.executed)
            .iter()
            .filter(|s| s.as_str() == sql)
            .count()
    }
}

impl Driver for ScriptedDriver {
    type Connection = ScriptedConnection;

    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn connect(&self, conn_str: &ConnectionString) -> Result<ScriptedConnection, DbError> {
        if let Some(message) = lock(&self.shared.connect_failure).clone() {
            return Err(DbError::Connect(message));
        }
        let id = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(id, conn = %conn_str.fingerprint(), "Scripted session opened");
        Ok(ScriptedConnection {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    fn probe_sql(&self) -> &'static str {
        SCRIPTED_PROBE_SQL
    }
}

/// Session handed out by `ScriptedDriver`. Dropping it counts as a close.
pub struct ScriptedConnection {
    shared: Arc<Shared>,
    id: usize,
}

impl ScriptedConnection {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        debug!(id = self.id, "Scripted session closed");
    }
}

impl Connection for ScriptedConnection {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DbError> {
        lock(&self.shared.executed).push(sql.to_string());
        let script = lock(&self.shared.scripts)
            .get(sql)
            .cloned()
            .ok_or_else(|| DbError::Query(format!("no script for statement: {}", sql)))?;
        let hook = lock(&self.shared.row_hooks).get(sql).cloned();

        let cursor = match script {
            Script::ExecuteError(message) => return Err(DbError::Query(message)),
            Script::ColumnsError(message) => ScriptedCursor {
                columns: Err(message),
                rows: VecDeque::new(),
                failure: None,
                hook,
                yielded: 0,
            },
            Script::Rows { columns, rows } => ScriptedCursor {
                columns: Ok(columns),
                rows: rows.into_iter().map(DbRow::new).collect(),
                failure: None,
                hook,
                yielded: 0,
            },
            Script::RowError {
                columns,
                rows,
                after,
                message,
            } => ScriptedCursor {
                columns: Ok(columns),
                rows: rows.into_iter().take(after).map(DbRow::new).collect(),
                failure: Some(message),
                hook,
                yielded: 0,
            },
        };
        Ok(Box::new(cursor))
    }
}

struct ScriptedCursor {
    columns: Result<Vec<String>, String>,
    rows: VecDeque<DbRow>,
    failure: Option<String>,
    hook: Option<RowHook>,
    yielded: usize,
}

impl RowCursor for ScriptedCursor {
    fn columns(&mut self) -> Result<Vec<String>, DbError> {
        self.columns.clone().map_err(DbError::Metadata)
    }

    fn next_row(&mut self) -> Result<Option<DbRow>, DbError> {
        if let Some(row) = self.rows.pop_front() {
            if let Some(hook) = &self.hook {
                hook(self.yielded);
            }
            self.yielded += 1;
            return Ok(Some(row));
        }
        match &self.failure {
            Some(message) => Err(DbError::Fetch(message.clone())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_str() -> ConnectionString {
        ConnectionString::from_parts("h", "1", "d", "u", "p")
    }

    #[test]
    fn test_counts_connects_and_closes() {
        let driver = ScriptedDriver::new();
        let a = driver.connect(&conn_str()).unwrap();
        let b = driver.connect(&conn_str()).unwrap();
        assert_eq!(driver.live_connections(), 2);
        drop(a);
        assert_eq!(driver.closes(), 1);
        drop(b);
        assert_eq!(driver.live_connections(), 0);
    }

    #[test]
    fn test_row_error_after_n_rows() {
        let driver = ScriptedDriver::new();
        driver.script_row_error(
            "q",
            &["time", "v"],
            vec![vec![DbValue::Integer(1)], vec![DbValue::Integer(2)]],
            1,
            "fetch broke",
        );
        let mut conn = driver.connect(&conn_str()).unwrap();
        let mut cursor = conn.query("q").unwrap();
        assert!(cursor.next_row().unwrap().is_some());
        assert_eq!(
            cursor.next_row().unwrap_err(),
            DbError::Fetch("fetch broke".into())
        );
    }

    #[test]
    fn test_row_hook_sees_each_row_index() {
        let driver = ScriptedDriver::new();
        driver.script_rows(
            "q",
            &["time"],
            vec![vec![DbValue::Integer(1)], vec![DbValue::Integer(2)]],
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        driver.on_row("q", move |index| lock(&sink).push(index));

        let mut conn = driver.connect(&conn_str()).unwrap();
        let mut cursor = conn.query("q").unwrap();
        while cursor.next_row().unwrap().is_some() {}
        assert_eq!(*lock(&seen), vec![0, 1]);
    }

    #[test]
    fn test_unscripted_sql_fails_and_is_recorded() {
        let driver = ScriptedDriver::new();
        let mut conn = driver.connect(&conn_str()).unwrap();
        assert!(conn.query("select nothing").is_err());
        assert_eq!(driver.executed(), vec!["select nothing".to_string()]);
    }

    #[test]
    fn test_connect_failure_toggle() {
        let driver = ScriptedDriver::new();
        driver.fail_connect("SQL30081N");
        assert!(driver.connect(&conn_str()).is_err());
        driver.allow_connect();
        assert!(driver.connect(&conn_str()).is_ok());
        assert_eq!(driver.connects(), 1);
    }
}
