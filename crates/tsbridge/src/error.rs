//! Error types for the engine.
//!
//! Two tiers: `QueryError` is attached to a single query's slot in the batch
//! response and never aborts its siblings; `ServiceError` fails the whole
//! batch (bad configuration, no connection, worker crash).

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tsbridge_db::PoolError;

use crate::frame::FrameError;

/// Instance settings could not be turned into a usable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid instance settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("instance setting '{0}' is required")]
    MissingField(&'static str),
}

/// Classification of a per-query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    /// The query payload did not decode
    Decode,
    /// The statement failed, or its result metadata could not be read
    Execution,
    /// The result set had no columns
    Schema,
    /// A row could not be coerced into the fixed column types
    RowScan,
    /// The caller abandoned the batch before this query finished
    Cancelled,
}

impl QueryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::Decode => "decode error",
            QueryErrorKind::Execution => "query execution error",
            QueryErrorKind::Schema => "schema error",
            QueryErrorKind::RowScan => "row scan error",
            QueryErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one query inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{kind}: {message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl fmt::Display) -> Self {
        Self {
            kind,
            message: single_line(&message.to_string()),
        }
    }

    pub fn decode(message: impl fmt::Display) -> Self {
        Self::new(QueryErrorKind::Decode, message)
    }

    pub fn execution(message: impl fmt::Display) -> Self {
        Self::new(QueryErrorKind::Execution, message)
    }

    pub fn schema(message: impl fmt::Display) -> Self {
        Self::new(QueryErrorKind::Schema, message)
    }

    pub fn row_scan(message: impl fmt::Display) -> Self {
        Self::new(QueryErrorKind::RowScan, message)
    }

    pub fn cancelled() -> Self {
        Self::new(QueryErrorKind::Cancelled, "batch was cancelled by the caller")
    }
}

impl From<FrameError> for QueryError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::NoColumns => QueryError::schema(err),
            other => QueryError::execution(other),
        }
    }
}

/// Failure of a whole batch or health check.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to acquire connection: {0}")]
    Connection(#[from] PoolError),

    #[error("batch worker failed: {0}")]
    Worker(String),
}

/// Collapse driver diagnostics onto one line.
pub(crate) fn single_line(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}
