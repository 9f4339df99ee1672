//! Host payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::defaults::PASSWORD_SECRET_KEY;
use crate::error::ProtocolError;

// ============================================================================
// Instance configuration
// ============================================================================

/// Configuration of one datasource instance as delivered by the host.
///
/// `json_data` holds the plain settings (`{Host, Port, Database, User}`);
/// secrets arrive already decrypted in `decrypted_secure_json_data` and are
/// never serialized back out.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSettings {
    /// Display name of the instance
    #[serde(default)]
    pub name: String,
    /// Last modification time reported by the host
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub json_data: serde_json::Value,
    #[serde(default, skip_serializing)]
    pub decrypted_secure_json_data: HashMap<String, String>,
}

impl InstanceSettings {
    pub fn new(name: impl Into<String>, json_data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            updated: None,
            json_data,
            decrypted_secure_json_data: HashMap::new(),
        }
    }

    /// Parse settings from a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Attach the decrypted password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.decrypted_secure_json_data
            .insert(PASSWORD_SECRET_KEY.to_string(), password.into());
        self
    }

    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = Some(updated);
        self
    }

    /// The decrypted password, empty when the host supplied none.
    pub fn password(&self) -> &str {
        self.decrypted_secure_json_data
            .get(PASSWORD_SECRET_KEY)
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl fmt::Debug for InstanceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secret_keys: Vec<&String> = self.decrypted_secure_json_data.keys().collect();
        secret_keys.sort();
        f.debug_struct("InstanceSettings")
            .field("name", &self.name)
            .field("updated", &self.updated)
            .field("json_data", &self.json_data)
            .field("secret_keys", &secret_keys)
            .finish()
    }
}

/// Identifies which configured instance a request targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginContext {
    /// Opaque cache key for the instance (stable across config edits)
    pub instance_key: String,
    pub settings: InstanceSettings,
}

impl PluginContext {
    pub fn new(instance_key: impl Into<String>, settings: InstanceSettings) -> Self {
        Self {
            instance_key: instance_key.into(),
            settings,
        }
    }
}

// ============================================================================
// Query batch
// ============================================================================

/// One query inside a batch, keyed by its RefID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuery {
    #[serde(rename = "refId")]
    pub ref_id: String,
    /// Raw query model; decoded lazily so a bad payload only fails its own slot
    #[serde(default)]
    pub json: serde_json::Value,
}

impl DataQuery {
    pub fn new(ref_id: impl Into<String>, json: serde_json::Value) -> Self {
        Self {
            ref_id: ref_id.into(),
            json,
        }
    }
}

/// Decoded per-query payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryModel {
    #[serde(default)]
    pub hide: bool,
    /// Missing text decodes as empty; only a runnable query fails on it
    #[serde(rename = "queryText", default)]
    pub query_text: String,
}

impl QueryModel {
    pub fn from_query(query: &DataQuery) -> Result<Self, ProtocolError> {
        serde_json::from_value(query.json.clone()).map_err(|source| ProtocolError::InvalidQuery {
            ref_id: query.ref_id.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataRequest {
    pub plugin_context: PluginContext,
    #[serde(default)]
    pub queries: Vec<DataQuery>,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthRequest {
    pub plugin_context: PluginContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Ok,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
}

impl CheckHealthResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_model_defaults_hide_to_false() {
        let query = DataQuery::new("A", json!({"queryText": "select 1"}));
        let model = QueryModel::from_query(&query).unwrap();
        assert!(!model.hide);
        assert_eq!(model.query_text, "select 1");
    }

    #[test]
    fn test_query_model_missing_query_text_is_empty() {
        let query = DataQuery::new("B", json!({"hide": true}));
        let model = QueryModel::from_query(&query).unwrap();
        assert!(model.hide);
        assert_eq!(model.query_text, "");
    }

    #[test]
    fn test_query_model_rejects_wrong_types() {
        let query = DataQuery::new("C", json!({"hide": "yes", "queryText": "x"}));
        let err = QueryModel::from_query(&query).unwrap_err();
        assert!(err.to_string().contains("refId 'C'"));
    }

    #[test]
    fn test_password_missing_is_empty() {
        let settings = InstanceSettings::new("db", json!({}));
        assert_eq!(settings.password(), "");
        let settings = settings.with_password("s3cret");
        assert_eq!(settings.password(), "s3cret");
    }

    #[test]
    fn test_settings_debug_hides_secret_values() {
        let settings = InstanceSettings::new("db", json!({"Host": "h"})).with_password("s3cret");
        let debug = format!("{:?}", settings);
        assert!(debug.contains("password"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_health_status_wire_names() {
        assert_eq!(serde_json::to_string(&HealthStatus::Ok).unwrap(), "\"OK\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Error).unwrap(), "\"ERROR\"");
    }
}
