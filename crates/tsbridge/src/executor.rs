//! Query execution.
//!
//! Each query runs verbatim on a leased session. Column 0 is read as a
//! timestamp and every other column as int64; there is no type probing.
//! Rows stream into `TypedColumns` and a failure at any point discards what
//! was read so far for that query only.

use tracing::{debug, warn};

use tsbridge_db::Connection;
use tsbridge_protocol::defaults::RESPONSE_FRAME_NAME;
use tsbridge_protocol::{DataQuery, QueryModel};

use crate::cancel::CancelToken;
use crate::error::QueryError;
use crate::frame::{assemble, ColumnDescriptor, TimeSeriesFrame, TypedColumns};
use crate::response::DataResponse;

/// A query after its payload has been decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedQuery {
    /// `hide: true`; resolves empty without touching the database.
    Hidden,
    /// The payload did not decode.
    Invalid(QueryError),
    Runnable(String),
}

impl PreparedQuery {
    /// Whether this query needs a database session.
    pub fn needs_connection(&self) -> bool {
        matches!(self, PreparedQuery::Runnable(_))
    }

    /// Resolve without a session. `None` for runnable queries.
    pub fn resolve_offline(&self) -> Option<DataResponse> {
        match self {
            PreparedQuery::Hidden => Some(DataResponse::empty()),
            PreparedQuery::Invalid(err) => Some(DataResponse::from_error(err.clone())),
            PreparedQuery::Runnable(_) => None,
        }
    }
}

/// Runs queries and shapes their results into frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn prepare(query: &DataQuery) -> PreparedQuery {
        match QueryModel::from_query(query) {
            Ok(model) if model.hide => PreparedQuery::Hidden,
            Ok(model) => PreparedQuery::Runnable(model.query_text),
            Err(err) => {
                warn!(ref_id = %query.ref_id, error = %err, "Failed to decode query");
                PreparedQuery::Invalid(QueryError::decode(err))
            }
        }
    }

    /// Run `sql` and build its frame.
    pub fn run<C: Connection>(
        conn: &mut C,
        sql: &str,
        cancel: &CancelToken,
    ) -> Result<TimeSeriesFrame, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::cancelled());
        }

        let mut cursor = conn.query(sql).map_err(QueryError::execution)?;
        let names = cursor.columns().map_err(QueryError::execution)?;
        let descriptors = ColumnDescriptor::from_names(&names)?;
        let mut columns = TypedColumns::new(&descriptors);

        loop {
            if cancel.is_cancelled() {
                return Err(QueryError::cancelled());
            }
            match cursor.next_row().map_err(QueryError::row_scan)? {
                Some(row) => columns.push_row(&row).map_err(QueryError::row_scan)?,
                None => break,
            }
        }
        drop(cursor);

        debug!(rows = columns.len(), fields = descriptors.len(), "Query complete");
        Ok(assemble(RESPONSE_FRAME_NAME, &descriptors, columns)?)
    }

    /// Decode and run one query, folding every failure into its response.
    pub fn execute<C: Connection>(
        conn: &mut C,
        query: &DataQuery,
        cancel: &CancelToken,
    ) -> DataResponse {
        let prepared = Self::prepare(query);
        match prepared {
            PreparedQuery::Runnable(sql) => Self::execute_prepared(conn, &query.ref_id, &sql, cancel),
            other => other.resolve_offline().unwrap_or_default(),
        }
    }

    pub(crate) fn execute_prepared<C: Connection>(
        conn: &mut C,
        ref_id: &str,
        sql: &str,
        cancel: &CancelToken,
    ) -> DataResponse {
        let result = Self::run(conn, sql, cancel);
        if let Err(err) = &result {
            warn!(ref_id, kind = %err.kind, error = %err.message, "Query failed");
        }
        result.into()
    }
}
