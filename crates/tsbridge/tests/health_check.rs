//! Health probe outcomes.

use tsbridge::{Datasource, ServiceConfig};
use tsbridge_protocol::{CheckHealthRequest, HealthStatus};
use tsbridge_test_utils::fixtures::{instance_settings, plugin_context};
use tsbridge_test_utils::{ScriptedDriver, SCRIPTED_PROBE_SQL};

fn health_request() -> CheckHealthRequest {
    CheckHealthRequest {
        plugin_context: plugin_context("ds-1", instance_settings("Db2", "db2.local", "SAMPLE")),
    }
}

fn datasource(driver: &ScriptedDriver) -> Datasource<ScriptedDriver> {
    Datasource::new(driver.clone(), ServiceConfig::default())
}

#[test]
fn test_probe_reports_server_time() {
    let driver = ScriptedDriver::new();
    let ds = datasource(&driver);

    let result = ds.check_health_blocking(&health_request());
    assert_eq!(result.status, HealthStatus::Ok);
    assert_eq!(
        result.message,
        "Check successful; current timestamp = 2024-01-01 00:00:00.000000"
    );
    assert_eq!(driver.executed(), vec![SCRIPTED_PROBE_SQL]);
    assert_eq!(ds.pool_status().leased, 0);
    assert_eq!(ds.pool_status().idle, 1);
}

#[test]
fn test_probe_failure_reports_error_and_drops_session() {
    let driver = ScriptedDriver::new();
    driver.script_execute_error(SCRIPTED_PROBE_SQL, "SQL1224N  The database manager is not able to accept new requests.");
    let ds = datasource(&driver);

    let result = ds.check_health_blocking(&health_request());
    assert_eq!(result.status, HealthStatus::Error);
    assert!(result.message.contains("SQL1224N"));
    assert_eq!(driver.live_connections(), 0);
    assert_eq!(ds.pool_status().open, 0);
}

#[test]
fn test_probe_without_rows_is_error() {
    let driver = ScriptedDriver::new();
    driver.script_rows(SCRIPTED_PROBE_SQL, &["1"], vec![]);
    let ds = datasource(&driver);

    let result = ds.check_health_blocking(&health_request());
    assert!(!result.is_ok());
    assert!(result.message.contains("no rows"));
}

#[test]
fn test_connect_failure_reports_error() {
    let driver = ScriptedDriver::new();
    driver.fail_connect("SQL30082N  Security processing failed with reason \"24\".");
    let ds = datasource(&driver);

    let result = ds.check_health_blocking(&health_request());
    assert_eq!(result.status, HealthStatus::Error);
    assert!(result.message.contains("SQL30082N"));
    assert_eq!(ds.pool_status().open, 0);
}

#[test]
fn test_invalid_settings_report_error() {
    let driver = ScriptedDriver::new();
    let ds = datasource(&driver);
    let mut req = health_request();
    req.plugin_context.settings.json_data = serde_json::json!({"Host": "db2.local"});

    let result = ds.check_health_blocking(&req);
    assert_eq!(result.status, HealthStatus::Error);
    assert!(result.message.contains("Port"));
    assert_eq!(driver.connects(), 0);
}

#[tokio::test]
async fn test_async_health_check() {
    let driver = ScriptedDriver::new();
    let ds = datasource(&driver);
    let result = ds.check_health(health_request()).await.unwrap();
    assert!(result.is_ok());
}
