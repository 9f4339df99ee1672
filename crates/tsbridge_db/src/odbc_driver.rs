//! ODBC backend for IBM Db2.
//!
//! Connects through the installed Db2 CLI/ODBC driver. The instance
//! connection string is passed through unchanged behind a `DRIVER={...};`
//! prefix naming the registered driver.

use std::sync::OnceLock;

use odbc_api::{
    sys, Connection as OdbcSession, ConnectionOptions, Cursor, DataType, Environment, Nullable,
    ResultSetMetadata,
};
use tracing::info;

use crate::connection_string::ConnectionString;
use crate::driver::{Connection, Driver, RowCursor};
use crate::error::DbError;
use crate::value::{DbRow, DbTimestamp, DbValue};

/// Name the IBM Data Server Driver registers under in `odbcinst.ini`.
pub const DEFAULT_DB2_DRIVER: &str = "IBM DB2 ODBC DRIVER";

fn environment() -> Result<&'static Environment, DbError> {
    static ENV: OnceLock<Result<Environment, String>> = OnceLock::new();
    ENV.get_or_init(|| Environment::new().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| DbError::Connect(format!("ODBC environment unavailable: {}", e)))
}

#[derive(Debug, Clone)]
pub struct OdbcDriver {
    driver_name: String,
}

impl OdbcDriver {
    pub fn new(driver_name: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
        }
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }
}

impl Default for OdbcDriver {
    fn default() -> Self {
        Self::new(DEFAULT_DB2_DRIVER)
    }
}

impl Driver for OdbcDriver {
    type Connection = OdbcConnection;

    fn name(&self) -> &'static str {
        "Db2"
    }

    fn connect(&self, conn_str: &ConnectionString) -> Result<OdbcConnection, DbError> {
        let env = environment()?;
        let full = format!("DRIVER={{{}}};{}", self.driver_name, conn_str.as_str());
        let session = env
            .connect_with_connection_string(&full, ConnectionOptions::default())
            .map_err(|e| DbError::Connect(e.to_string()))?;
        info!(
            driver = %self.driver_name,
            host = conn_str.get("HOSTNAME").unwrap_or_default(),
            database = conn_str.get("DATABASE").unwrap_or_default(),
            "Opened ODBC session"
        );
        Ok(OdbcConnection { session })
    }

    fn probe_sql(&self) -> &'static str {
        "select current timestamp from sysibm.sysdummy1"
    }
}

pub struct OdbcConnection {
    session: OdbcSession<'static>,
}

impl std::fmt::Debug for OdbcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdbcConnection").finish_non_exhaustive()
    }
}

impl Connection for OdbcConnection {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DbError> {
        let cursor = self
            .session
            .execute(sql, (), None)
            .map_err(|e| DbError::Query(e.to_string()))?
            .ok_or_else(|| DbError::Query("statement produced no result set".to_string()))?;
        Ok(Box::new(OdbcCursor {
            cursor,
            types: None,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum CellKind {
    Timestamp,
    Integer,
    Float,
    Text,
}

impl From<DataType> for CellKind {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Timestamp { .. } => CellKind::Timestamp,
            DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => {
                CellKind::Integer
            }
            DataType::Real | DataType::Float { .. } | DataType::Double => CellKind::Float,
            // Dates, decimals and character data come back as text and are
            // parsed on extraction.
            _ => CellKind::Text,
        }
    }
}

struct OdbcCursor<C> {
    cursor: C,
    types: Option<Vec<CellKind>>,
}

impl<C: Cursor> OdbcCursor<C> {
    fn kinds(&mut self) -> Result<Vec<CellKind>, DbError> {
        if let Some(types) = &self.types {
            return Ok(types.clone());
        }
        let count = self
            .cursor
            .num_result_cols()
            .map_err(|e| DbError::Metadata(e.to_string()))?;
        let mut kinds = Vec::with_capacity(count.max(0) as usize);
        for col in 1..=count.max(0) as u16 {
            let data_type = self
                .cursor
                .col_data_type(col)
                .map_err(|e| DbError::Metadata(e.to_string()))?;
            kinds.push(CellKind::from(data_type));
        }
        self.types = Some(kinds.clone());
        Ok(kinds)
    }
}

impl<C: Cursor> RowCursor for OdbcCursor<C> {
    fn columns(&mut self) -> Result<Vec<String>, DbError> {
        self.cursor
            .column_names()
            .map_err(|e| DbError::Metadata(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::Metadata(e.to_string()))
    }

    fn next_row(&mut self) -> Result<Option<DbRow>, DbError> {
        let kinds = self.kinds()?;
        let mut row = match self
            .cursor
            .next_row()
            .map_err(|e| DbError::Fetch(e.to_string()))?
        {
            Some(row) => row,
            None => return Ok(None),
        };

        let mut values = Vec::with_capacity(kinds.len());
        let mut text = Vec::new();
        for (i, kind) in kinds.iter().enumerate() {
            let col = (i + 1) as u16;
            let fetch_err = |e: odbc_api::Error| DbError::Fetch(e.to_string());
            let value = match kind {
                CellKind::Timestamp => {
                    let mut cell = Nullable::<sys::Timestamp>::null();
                    row.get_data(col, &mut cell).map_err(fetch_err)?;
                    match cell.into_opt() {
                        Some(ts) => DbValue::Timestamp(odbc_timestamp(&ts)?),
                        None => DbValue::Null,
                    }
                }
                CellKind::Integer => {
                    let mut cell = Nullable::<i64>::null();
                    row.get_data(col, &mut cell).map_err(fetch_err)?;
                    cell.into_opt().map(DbValue::Integer).unwrap_or(DbValue::Null)
                }
                CellKind::Float => {
                    let mut cell = Nullable::<f64>::null();
                    row.get_data(col, &mut cell).map_err(fetch_err)?;
                    cell.into_opt().map(DbValue::Real).unwrap_or(DbValue::Null)
                }
                CellKind::Text => {
                    text.clear();
                    if row.get_text(col, &mut text).map_err(fetch_err)? {
                        DbValue::Text(String::from_utf8_lossy(&text).into_owned())
                    } else {
                        DbValue::Null
                    }
                }
            };
            values.push(value);
        }
        Ok(Some(DbRow::new(values)))
    }
}

fn odbc_timestamp(ts: &sys::Timestamp) -> Result<DbTimestamp, DbError> {
    chrono::NaiveDate::from_ymd_opt(ts.year.into(), ts.month.into(), ts.day.into())
        .and_then(|date| {
            date.and_hms_nano_opt(
                ts.hour.into(),
                ts.minute.into(),
                ts.second.into(),
                ts.fraction,
            )
        })
        .map(DbTimestamp::from_naive_utc)
        .ok_or_else(|| {
            DbError::TypeConversion(format!(
                "invalid timestamp {}-{}-{} {}:{}:{}",
                ts.year, ts.month, ts.day, ts.hour, ts.minute, ts.second
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_kind_mapping() {
        assert!(matches!(
            CellKind::from(DataType::Timestamp { precision: 6 }),
            CellKind::Timestamp
        ));
        assert!(matches!(CellKind::from(DataType::BigInt), CellKind::Integer));
        assert!(matches!(CellKind::from(DataType::Double), CellKind::Float));
        assert!(matches!(CellKind::from(DataType::Date), CellKind::Text));
    }

    #[test]
    fn test_odbc_timestamp_conversion() {
        let ts = sys::Timestamp {
            year: 2024,
            month: 3,
            day: 9,
            hour: 14,
            minute: 30,
            second: 5,
            fraction: 250_000_000,
        };
        let converted = odbc_timestamp(&ts).unwrap();
        assert_eq!(converted.to_string(), "2024-03-09 14:30:05.250000");

        let bad = sys::Timestamp { month: 13, ..ts };
        assert!(odbc_timestamp(&bad).is_err());
    }

    #[test]
    fn test_default_driver_name() {
        assert_eq!(OdbcDriver::default().driver_name(), DEFAULT_DB2_DRIVER);
        assert_eq!(
            OdbcDriver::default().probe_sql(),
            "select current timestamp from sysibm.sysdummy1"
        );
    }
}
