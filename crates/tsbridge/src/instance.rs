//! Instance lifecycle.
//!
//! An instance is one configured data source. The host identifies it by an
//! opaque key and ships its full settings with every request; the registry
//! turns those settings into an `InstanceState` once per configuration
//! version and replaces it when the settings change.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use tsbridge_db::{ConnectionPool, ConnectionString, Driver, PoolError, PooledConnection, SessionPolicy};
use tsbridge_protocol::{InstanceSettings, PluginContext};

use crate::error::ConfigError;

// ============================================================================
// Configuration snapshot
// ============================================================================

/// `Port` is accepted either as a JSON string or a JSON number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Text(String),
    Number(serde_json::Number),
}

impl PortValue {
    fn into_string(self) -> String {
        match self {
            PortValue::Text(text) => text,
            PortValue::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DataSourceOptions {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<PortValue>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingField(field)),
    }
}

/// Immutable configuration of one instance version.
#[derive(Clone)]
pub struct InstanceConfig {
    name: String,
    host: String,
    port: String,
    database: String,
    user: String,
    connection_string: ConnectionString,
}

impl InstanceConfig {
    /// Decode `{Host, Port, Database, User}` plus the `password` secret.
    pub fn from_settings(settings: &InstanceSettings) -> Result<Self, ConfigError> {
        let options: DataSourceOptions = if settings.json_data.is_null() {
            DataSourceOptions::default()
        } else {
            serde_json::from_value(settings.json_data.clone())?
        };

        let host = required(options.host, "Host")?;
        let port = required(options.port.map(PortValue::into_string), "Port")?;
        let database = required(options.database, "Database")?;
        let user = required(options.user, "User")?;
        let connection_string =
            ConnectionString::from_parts(&host, &port, &database, &user, settings.password());

        Ok(Self {
            name: settings.name.clone(),
            host,
            port,
            database,
            user,
            connection_string,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("name", &self.name)
            .field("connection_string", &self.connection_string)
            .finish()
    }
}

/// Identifies a configuration version: name, update time, plain settings and secrets.
pub fn settings_fingerprint(settings: &InstanceSettings) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(settings.name.as_bytes());
    hasher.update(&[0]);
    if let Some(updated) = settings.updated {
        hasher.update(updated.to_rfc3339().as_bytes());
    }
    hasher.update(&[0]);
    hasher.update(settings.json_data.to_string().as_bytes());
    hasher.update(&[0]);
    let mut secrets: Vec<(&String, &String)> = settings.decrypted_secure_json_data.iter().collect();
    secrets.sort();
    for (key, value) in secrets {
        hasher.update(key.as_bytes());
        hasher.update(&[b'=']);
        hasher.update(value.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex()[..16].to_string()
}

// ============================================================================
// Live state
// ============================================================================

/// Live resources bound to one `InstanceConfig`.
pub struct InstanceState<D: Driver> {
    key: String,
    config: InstanceConfig,
    fingerprint: String,
    pool: Arc<ConnectionPool<D>>,
    disposed: AtomicBool,
}

impl<D: Driver> InstanceState<D> {
    pub fn new(
        key: impl Into<String>,
        config: InstanceConfig,
        fingerprint: impl Into<String>,
        pool: Arc<ConnectionPool<D>>,
    ) -> Self {
        Self {
            key: key.into(),
            config,
            fingerprint: fingerprint.into(),
            pool,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn connection_string(&self) -> &ConnectionString {
        self.config.connection_string()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<D>> {
        &self.pool
    }

    /// Lease a session for this instance's connection string.
    pub fn open(&self, policy: SessionPolicy) -> Result<PooledConnection<D>, PoolError> {
        self.pool.open(self.config.connection_string(), policy)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Close idle pooled sessions for this instance. Leased sessions are left
    /// to finish and are closed by the pool when returned after expiry.
    ///
    /// Returns `false` if the state was already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let evicted = self.pool.evict_idle(self.config.connection_string());
        info!(
            instance = %self.key,
            name = %self.config.name(),
            evicted,
            "Disposed instance state"
        );
        true
    }
}

impl<D: Driver> fmt::Debug for InstanceState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceState")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("fingerprint", &self.fingerprint)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Cache of instance states keyed by the host's instance key.
pub struct InstanceRegistry<D: Driver> {
    pool: Arc<ConnectionPool<D>>,
    instances: RwLock<HashMap<String, Arc<InstanceState<D>>>>,
    disposals: AtomicUsize,
}

impl<D: Driver> InstanceRegistry<D> {
    pub fn new(pool: Arc<ConnectionPool<D>>) -> Self {
        Self {
            pool,
            instances: RwLock::new(HashMap::new()),
            disposals: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<D>> {
        &self.pool
    }

    /// Return the state for `ctx`, building it on first use or after a
    /// configuration change. A failed build caches nothing and leaves any
    /// earlier state in place.
    pub fn resolve(&self, ctx: &PluginContext) -> Result<Arc<InstanceState<D>>, ConfigError> {
        let fingerprint = settings_fingerprint(&ctx.settings);

        {
            let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = instances.get(&ctx.instance_key) {
                if state.fingerprint() == fingerprint {
                    return Ok(Arc::clone(state));
                }
            }
        }

        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have built it while we waited.
        if let Some(state) = instances.get(&ctx.instance_key) {
            if state.fingerprint() == fingerprint {
                return Ok(Arc::clone(state));
            }
        }

        let config = InstanceConfig::from_settings(&ctx.settings)?;
        let state = Arc::new(InstanceState::new(
            ctx.instance_key.clone(),
            config,
            fingerprint,
            Arc::clone(&self.pool),
        ));

        if let Some(previous) = instances.get(&ctx.instance_key) {
            debug!(
                instance = %ctx.instance_key,
                old = previous.fingerprint(),
                new = state.fingerprint(),
                "Instance configuration changed"
            );
            if previous.dispose() {
                self.disposals.fetch_add(1, Ordering::SeqCst);
            }
        }
        instances.insert(ctx.instance_key.clone(), Arc::clone(&state));
        info!(
            instance = %ctx.instance_key,
            name = %state.name(),
            host = %state.config().host(),
            port = %state.config().port(),
            database = %state.config().database(),
            user = %state.config().user(),
            conn = %state.connection_string().fingerprint(),
            "Instance configured"
        );
        Ok(state)
    }

    pub fn get(&self, key: &str) -> Option<Arc<InstanceState<D>>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of states disposed by this registry so far.
    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    /// Dispose and forget every cached state.
    pub fn dispose_all(&self) {
        let drained: Vec<_> = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, state)| state)
            .collect();
        for state in drained {
            if state.dispose() {
                self.disposals.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(json_data: serde_json::Value) -> InstanceSettings {
        InstanceSettings::new("Db2 prod", json_data).with_password("pw")
    }

    #[test]
    fn test_connection_string_literal() {
        let config = InstanceConfig::from_settings(&settings(json!({
            "Host": "h", "Port": "5432", "Database": "d", "User": "u"
        })).with_password("secret"))
        .unwrap();
        assert_eq!(
            config.connection_string().as_str(),
            "HOSTNAME=h;PORT=5432;DATABASE=d;UID=u;PWD=secret"
        );
    }

    #[test]
    fn test_numeric_port_is_accepted() {
        let config = InstanceConfig::from_settings(&settings(json!({
            "Host": "h", "Port": 50000, "Database": "d", "User": "u"
        })))
        .unwrap();
        assert_eq!(config.port(), "50000");
        assert_eq!(
            (config.host(), config.database(), config.user()),
            ("h", "d", "u")
        );
    }

    #[test]
    fn test_missing_password_is_empty() {
        let config = InstanceConfig::from_settings(&InstanceSettings::new(
            "x",
            json!({"Host": "h", "Port": "1", "Database": "d", "User": "u"}),
        ))
        .unwrap();
        assert!(config.connection_string().as_str().ends_with(";PWD="));
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let err = InstanceConfig::from_settings(&settings(json!({
            "Host": "h", "Port": "1", "Database": "d"
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("User")));

        let err = InstanceConfig::from_settings(&settings(json!({
            "Host": "  ", "Port": "1", "Database": "d", "User": "u"
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("Host")));

        let err = InstanceConfig::from_settings(&settings(serde_json::Value::Null)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("Host")));
    }

    #[test]
    fn test_wrong_json_type_is_json_error() {
        let err = InstanceConfig::from_settings(&settings(json!({"Host": 7}))).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
        let err = InstanceConfig::from_settings(&settings(json!("not an object"))).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = InstanceConfig::from_settings(&settings(json!({
            "Host": "h", "Port": "1", "Database": "d", "User": "u"
        })).with_password("hunter2"))
        .unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_fingerprint_tracks_every_input() {
        let base = settings(json!({"Host": "h"}));
        let same = settings(json!({"Host": "h"}));
        assert_eq!(settings_fingerprint(&base), settings_fingerprint(&same));

        let other_json = settings(json!({"Host": "h2"}));
        let other_secret = settings(json!({"Host": "h"})).with_password("pw2");
        let other_updated = settings(json!({"Host": "h"})).with_updated(chrono::Utc::now());
        for changed in [other_json, other_secret, other_updated] {
            assert_ne!(settings_fingerprint(&base), settings_fingerprint(&changed));
        }
    }
}
