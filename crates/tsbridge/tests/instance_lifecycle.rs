//! Instance resolution, supersession and disposal.

use std::sync::Arc;
use std::thread;

use tsbridge::{ConfigError, InstanceRegistry};
use tsbridge_db::{Connection, ConnectionPool, PoolConfig, SessionPolicy};
use tsbridge_test_utils::fixtures::{instance_settings, plugin_context};
use tsbridge_test_utils::{ScriptedDriver, SCRIPTED_PROBE_SQL};

fn registry(driver: &ScriptedDriver) -> InstanceRegistry<ScriptedDriver> {
    InstanceRegistry::new(ConnectionPool::new(
        driver.clone(),
        PoolConfig::default().with_max_connections(8),
    ))
}

#[test]
fn test_resolve_is_idempotent() {
    let driver = ScriptedDriver::new();
    let registry = registry(&driver);
    let ctx = plugin_context("ds-1", instance_settings("Db2", "db2.local", "SAMPLE"));

    let first = registry.resolve(&ctx).unwrap();
    let second = registry.resolve(&ctx).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.disposals(), 0);
    assert_eq!(
        first.connection_string().as_str(),
        "HOSTNAME=db2.local;PORT=50000;DATABASE=SAMPLE;UID=db2inst1;PWD=s3cret"
    );
}

#[test]
fn test_changed_settings_supersede_and_dispose_once() {
    let driver = ScriptedDriver::new();
    let registry = registry(&driver);
    let old_ctx = plugin_context("ds-1", instance_settings("Db2", "db2.local", "SAMPLE"));
    let new_ctx = plugin_context("ds-1", instance_settings("Db2", "db2.local", "SAMPLE").with_password("rotated"));

    let old = registry.resolve(&old_ctx).unwrap();
    let new = registry.resolve(&new_ctx).unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(old.is_disposed());
    assert!(!new.is_disposed());
    assert_eq!(registry.disposals(), 1);
    assert!(new.connection_string().as_str().ends_with("PWD=rotated"));

    // Same settings again: no further disposal.
    let again = registry.resolve(&new_ctx).unwrap();
    assert!(Arc::ptr_eq(&new, &again));
    assert!(!old.dispose(), "second dispose must be a no-op");
    assert_eq!(registry.disposals(), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_dispose_closes_idle_but_not_leased_sessions() {
    let driver = ScriptedDriver::new();
    let registry = registry(&driver);
    let old_ctx = plugin_context("ds-1", instance_settings("Db2", "old-host", "SAMPLE"));
    let old = registry.resolve(&old_ctx).unwrap();

    let mut in_flight = old.open(SessionPolicy::data_query()).unwrap();
    let idle = old.open(SessionPolicy::data_query()).unwrap();
    drop(idle);
    assert_eq!(registry.pool().status().idle, 1);
    assert_eq!(registry.pool().status().leased, 1);

    let new_ctx = plugin_context("ds-1", instance_settings("Db2", "new-host", "SAMPLE"));
    registry.resolve(&new_ctx).unwrap();
    assert!(old.is_disposed());
    assert_eq!(driver.closes(), 1, "only the idle session is closed");

    // The in-flight lease keeps working after its instance was superseded.
    let mut cursor = in_flight.query(SCRIPTED_PROBE_SQL).unwrap();
    assert!(cursor.next_row().unwrap().is_some());
    drop(cursor);
    drop(in_flight);
    assert_eq!(registry.pool().status().leased, 0);
}

#[test]
fn test_failed_build_keeps_previous_state() {
    let driver = ScriptedDriver::new();
    let registry = registry(&driver);
    let good = plugin_context("ds-1", instance_settings("Db2", "db2.local", "SAMPLE"));
    let state = registry.resolve(&good).unwrap();

    let mut broken = good.clone();
    broken.settings.json_data = serde_json::json!({"Host": "db2.local", "Port": "50000"});
    let err = registry.resolve(&broken).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField("Database")));

    let cached = registry.get("ds-1").unwrap();
    assert!(Arc::ptr_eq(&state, &cached));
    assert!(!state.is_disposed());
    assert_eq!(registry.disposals(), 0);
}

#[test]
fn test_failed_first_build_caches_nothing() {
    let driver = ScriptedDriver::new();
    let registry = registry(&driver);
    let mut ctx = plugin_context("ds-1", instance_settings("Db2", "db2.local", "SAMPLE"));
    ctx.settings.json_data = serde_json::json!("garbage");

    assert!(matches!(registry.resolve(&ctx), Err(ConfigError::Json(_))));
    assert!(registry.is_empty());
}

#[test]
fn test_concurrent_resolve_builds_once() {
    let driver = ScriptedDriver::new();
    let registry = Arc::new(registry(&driver));
    let ctx = plugin_context("ds-1", instance_settings("Db2", "db2.local", "SAMPLE"));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let ctx = ctx.clone();
            thread::spawn(move || registry.resolve(&ctx).unwrap())
        })
        .collect();
    let states: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(states.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.disposals(), 0);
}

#[test]
fn test_instances_are_keyed_independently() {
    let driver = ScriptedDriver::new();
    let registry = registry(&driver);
    let a = registry
        .resolve(&plugin_context("a", instance_settings("A", "host-a", "DB")))
        .unwrap();
    let b = registry
        .resolve(&plugin_context("b", instance_settings("B", "host-b", "DB")))
        .unwrap();
    assert_ne!(a.connection_string(), b.connection_string());
    assert_eq!(registry.len(), 2);

    registry.dispose_all();
    assert!(a.is_disposed() && b.is_disposed());
    assert!(registry.is_empty());
    assert_eq!(registry.disposals(), 2);
}
