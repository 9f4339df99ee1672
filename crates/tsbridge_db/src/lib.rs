//! Database access layer for tsbridge.
//!
//! Drivers open physical sessions; the shared `ConnectionPool` caps how many
//! are open at once across every data source instance and retires sessions
//! that outlive their `SessionPolicy`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tsbridge_db::{ConnectionPool, ConnectionString, DuckDbDriver, PoolConfig, SessionPolicy};
//!
//! let pool = ConnectionPool::new(DuckDbDriver, PoolConfig::default());
//! let conn_str = ConnectionString::parse("DATABASE=:memory:")?;
//! let mut conn = pool.open(&conn_str, SessionPolicy::data_query())?;
//! let mut cursor = conn.query("SELECT current_timestamp")?;
//! ```
//!
//! # Features
//!
//! - `duckdb` / `duckdb-bundled` (default): embedded DuckDB backend
//! - `odbc`: Db2 through an installed ODBC driver

mod connection_string;
mod driver;
mod error;
mod pool;
mod value;

#[cfg(feature = "duckdb")]
pub mod duckdb_driver;
#[cfg(feature = "odbc")]
pub mod odbc_driver;

pub use connection_string::ConnectionString;
pub use driver::{BufferedCursor, Connection, Driver, RowCursor};
pub use error::{DbError, PoolError};
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection, SessionPolicy};
pub use value::{DbRow, DbTimestamp, DbValue, FromDbValue};

#[cfg(feature = "duckdb")]
pub use duckdb_driver::{DuckDbConnection, DuckDbDriver};
#[cfg(feature = "odbc")]
pub use odbc_driver::{OdbcConnection, OdbcDriver, DEFAULT_DB2_DRIVER};
