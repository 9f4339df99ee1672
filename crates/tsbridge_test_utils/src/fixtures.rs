//! Builders for settings, queries and rows used across test suites.

use serde_json::json;
use tsbridge_db::{DbTimestamp, DbValue};
use tsbridge_protocol::{DataQuery, InstanceSettings, PluginContext};

/// Settings with all four required fields and a password.
pub fn instance_settings(name: &str, host: &str, database: &str) -> InstanceSettings {
    InstanceSettings::new(
        name,
        json!({
            "Host": host,
            "Port": "50000",
            "Database": database,
            "User": "db2inst1",
        }),
    )
    .with_password("s3cret")
}

/// Settings pointing the DuckDB driver at a private in-memory database.
pub fn duckdb_memory_settings(name: &str) -> InstanceSettings {
    instance_settings(name, "localhost", ":memory:")
}

pub fn plugin_context(key: &str, settings: InstanceSettings) -> PluginContext {
    PluginContext::new(key, settings)
}

pub fn query(ref_id: &str, sql: &str) -> DataQuery {
    DataQuery::new(ref_id, json!({ "queryText": sql }))
}

pub fn hidden_query(ref_id: &str, sql: &str) -> DataQuery {
    DataQuery::new(ref_id, json!({ "hide": true, "queryText": sql }))
}

/// Query whose payload cannot be decoded (`queryText` is not a string).
pub fn malformed_query(ref_id: &str) -> DataQuery {
    DataQuery::new(ref_id, json!({ "queryText": 42 }))
}

/// Parse `YYYY-MM-DD HH:MM:SS` as UTC; panics on bad input.
pub fn timestamp(raw: &str) -> DbTimestamp {
    match DbTimestamp::parse(raw) {
        Ok(ts) => ts,
        Err(e) => panic!("bad fixture timestamp '{}': {}", raw, e),
    }
}

/// A row of one timestamp followed by integer values.
pub fn row(time: &str, values: &[i64]) -> Vec<DbValue> {
    let mut row = Vec::with_capacity(values.len() + 1);
    row.push(DbValue::Timestamp(timestamp(time)));
    row.extend(values.iter().copied().map(DbValue::Integer));
    row
}
