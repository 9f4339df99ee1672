//! Error types for the database layer.

use std::time::Duration;
use thiserror::Error;

/// Driver-level failures. Messages carry the driver's own diagnostic text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Opening a physical session failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The statement was rejected or failed while executing
    #[error("Query failed: {0}")]
    Query(String),

    /// Result-set metadata could not be read
    #[error("Failed to read column metadata: {0}")]
    Metadata(String),

    /// Fetching the next row from the driver failed
    #[error("Failed to fetch row: {0}")]
    Fetch(String),

    /// A value could not be coerced into the requested type
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The pooled handle was already returned to the pool
    #[error("Connection already released")]
    Released,
}

/// Pool lease failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("{driver} connection failed: {message}")]
    Connect {
        driver: &'static str,
        message: String,
    },

    #[error("Timed out after {0:?} waiting for a pooled connection")]
    Timeout(Duration),

    #[error("Connection pool is closed")]
    Closed,
}

impl PoolError {
    pub(crate) fn connect(driver: &'static str, err: DbError) -> Self {
        let message = match err {
            DbError::Connect(msg) => msg,
            other => other.to_string(),
        };
        PoolError::Connect { driver, message }
    }
}
