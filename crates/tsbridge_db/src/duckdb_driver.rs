//! DuckDB backend.
//!
//! Used for local development and tests. The `DATABASE` attribute of the
//! connection string names the database file (`:memory:` for a private
//! in-memory database); all other attributes are ignored. DuckDB result sets
//! are read eagerly into a `BufferedCursor`.

use duckdb::types::{TimeUnit, ValueRef};
use tracing::{info, warn};

use crate::connection_string::ConnectionString;
use crate::driver::{BufferedCursor, Connection, Driver, RowCursor};
use crate::error::DbError;
use crate::value::{DbRow, DbTimestamp, DbValue};

const MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDriver;

impl Driver for DuckDbDriver {
    type Connection = DuckDbConnection;

    fn name(&self) -> &'static str {
        "DuckDB"
    }

    fn connect(&self, conn_str: &ConnectionString) -> Result<DuckDbConnection, DbError> {
        let database = conn_str
            .get("DATABASE")
            .map(str::trim)
            .filter(|db| !db.is_empty())
            .ok_or_else(|| {
                DbError::InvalidConnectionString("DATABASE attribute is required".to_string())
            })?;
        DuckDbConnection::open(database)
    }

    fn probe_sql(&self) -> &'static str {
        "SELECT current_timestamp"
    }
}

/// One DuckDB session.
pub struct DuckDbConnection {
    conn: duckdb::Connection,
}

impl std::fmt::Debug for DuckDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbConnection").finish_non_exhaustive()
    }
}

impl DuckDbConnection {
    /// Open a database file, or a private in-memory database for `:memory:`.
    pub fn open(database: &str) -> Result<Self, DbError> {
        let conn = if database == MEMORY_DATABASE {
            duckdb::Connection::open_in_memory()
        } else {
            duckdb::Connection::open(database)
        }
        .map_err(|e| DbError::Connect(e.to_string()))?;
        info!(database, "Opened DuckDB session");
        Ok(Self { conn })
    }

    /// Run one or more statements that return no rows (schema setup, seeding).
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| DbError::Query(e.to_string()))
    }
}

impl Connection for DuckDbConnection {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DbError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DbError::Query(e.to_string()))?;
        let mut rows = stmt
            .query(duckdb::params![])
            .map_err(|e| DbError::Query(e.to_string()))?;

        let columns: Vec<String> = match rows.as_ref() {
            Some(stmt_ref) => (0..stmt_ref.column_count())
                .map(|i| {
                    stmt_ref
                        .column_name(i)
                        .map(|name| name.to_string())
                        .map_err(|e| DbError::Metadata(e.to_string()))
                })
                .collect::<Result<_, _>>()?,
            None => return Err(DbError::Metadata("statement returned no result set".into())),
        };

        let mut buffered = Vec::new();
        while let Some(row) = rows.next().map_err(|e| DbError::Fetch(e.to_string()))? {
            let values = (0..columns.len())
                .map(|index| cell_value(row, index))
                .collect::<Result<Vec<_>, _>>()?;
            buffered.push(DbRow::new(values));
        }

        Ok(Box::new(BufferedCursor::new(columns, buffered)))
    }
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn cell_value(row: &duckdb::Row<'_>, index: usize) -> Result<DbValue, DbError> {
    let value = row
        .get_ref(index)
        .map_err(|e| DbError::Fetch(e.to_string()))?;
    let converted = match value {
        ValueRef::Null => DbValue::Null,
        ValueRef::Boolean(v) => DbValue::Boolean(v),
        ValueRef::TinyInt(v) => DbValue::Integer(v.into()),
        ValueRef::SmallInt(v) => DbValue::Integer(v.into()),
        ValueRef::Int(v) => DbValue::Integer(v.into()),
        ValueRef::BigInt(v) => DbValue::Integer(v),
        ValueRef::UTinyInt(v) => DbValue::Integer(v.into()),
        ValueRef::USmallInt(v) => DbValue::Integer(v.into()),
        ValueRef::UInt(v) => DbValue::Integer(v.into()),
        ValueRef::UBigInt(v) => match i64::try_from(v) {
            Ok(v) => DbValue::Integer(v),
            Err(_) => DbValue::Text(v.to_string()),
        },
        ValueRef::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => DbValue::Integer(v),
            Err(_) => DbValue::Text(v.to_string()),
        },
        ValueRef::Float(v) => DbValue::Real(v.into()),
        ValueRef::Double(v) => DbValue::Real(v),
        ValueRef::Decimal(v) => DbValue::Text(v.to_string()),
        ValueRef::Text(bytes) => DbValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Timestamp(unit, v) => {
            let micros = to_micros(unit, v);
            match DbTimestamp::from_unix_micros(micros) {
                Some(ts) => DbValue::Timestamp(ts),
                None => {
                    return Err(DbError::TypeConversion(format!(
                        "timestamp {}us is out of range",
                        micros
                    )))
                }
            }
        }
        ValueRef::Date32(days) => {
            let micros = i64::from(days).saturating_mul(86_400_000_000);
            match DbTimestamp::from_unix_micros(micros) {
                Some(ts) => DbValue::Timestamp(ts),
                None => DbValue::Text(format!("date+{}d", days)),
            }
        }
        other => {
            warn!(
                column = index,
                "DuckDB type {:?} mapped to debug string",
                std::mem::discriminant(&other)
            );
            DbValue::Text(format!("{:?}", other))
        }
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ConnectionString {
        ConnectionString::parse("DATABASE=:memory:").unwrap()
    }

    #[test]
    fn test_query_reads_columns_and_rows() {
        let mut conn = DuckDbDriver.connect(&memory()).unwrap();
        let mut cursor = conn
            .query(
                "SELECT * FROM (VALUES (TIMESTAMP '2024-01-01 00:00:00', 10), \
                 (TIMESTAMP '2024-01-01 00:01:00', 20)) t(ts, value) ORDER BY ts",
            )
            .unwrap();
        assert_eq!(cursor.columns().unwrap(), vec!["ts", "value"]);

        let first = cursor.next_row().unwrap().unwrap();
        let ts: DbTimestamp = first.get(0).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(first.get::<i64>(1).unwrap(), 10);
        assert!(cursor.next_row().unwrap().is_some());
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn test_empty_result_keeps_column_names() {
        let mut conn = DuckDbDriver.connect(&memory()).unwrap();
        let mut cursor = conn
            .query("SELECT TIMESTAMP '2024-01-01' AS ts, 1 AS v WHERE 1 = 0")
            .unwrap();
        assert_eq!(cursor.columns().unwrap(), vec!["ts", "v"]);
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn test_syntax_error_is_query_error() {
        let mut conn = DuckDbDriver.connect(&memory()).unwrap();
        let err = conn.query("SELEC nonsense").err().unwrap();
        assert!(matches!(err, DbError::Query(_)));
    }

    #[test]
    fn test_missing_database_attribute() {
        let conn_str = ConnectionString::from_parts("h", "1", "", "u", "p");
        let err = DuckDbDriver.connect(&conn_str).unwrap_err();
        assert!(matches!(err, DbError::InvalidConnectionString(_)));
    }

    #[test]
    fn test_probe_returns_timestamp() {
        let driver = DuckDbDriver;
        let mut conn = driver.connect(&memory()).unwrap();
        let mut cursor = conn.query(driver.probe_sql()).unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert!(matches!(row.get_raw(0), Some(DbValue::Timestamp(_))));
    }

    #[test]
    fn test_file_database_persists_between_sessions() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("metrics.duckdb");
        let database = path.display().to_string();
        {
            let mut setup = DuckDbConnection::open(&database).unwrap();
            setup
                .execute_batch("CREATE TABLE m (ts TIMESTAMP, v BIGINT); INSERT INTO m VALUES ('2024-05-01 12:00:00', 5);")
                .unwrap();
        }
        let conn_str = ConnectionString::from_parts("localhost", "0", &database, "u", "p");
        let mut conn = DuckDbDriver.connect(&conn_str).unwrap();
        let mut cursor = conn.query("SELECT ts, v FROM m").unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get::<i64>(1).unwrap(), 5);
    }
}
