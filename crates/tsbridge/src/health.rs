//! Health probe: lease a short-lived session and read the server clock.

use tracing::{info, warn};

use tsbridge_db::{Connection, DbError, DbValue, Driver, SessionPolicy};
use tsbridge_protocol::CheckHealthResult;

use crate::error::single_line;
use crate::instance::InstanceState;

#[derive(Debug, Clone, Copy)]
pub struct HealthProber {
    policy: SessionPolicy,
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new(SessionPolicy::health_check())
    }
}

impl HealthProber {
    pub fn new(policy: SessionPolicy) -> Self {
        Self { policy }
    }

    /// Any lease, execution or scan failure reports `ERROR` with the driver's message.
    pub fn probe<D: Driver>(&self, state: &InstanceState<D>) -> CheckHealthResult {
        let mut conn = match state.open(self.policy) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(instance = %state.key(), error = %e, "Health check could not connect");
                return CheckHealthResult::error(single_line(&format!(
                    "Health check failed: {}",
                    e
                )));
            }
        };

        let probe_sql = state.pool().driver().probe_sql();
        match read_server_time(&mut conn, probe_sql) {
            Ok(now) => {
                info!(instance = %state.key(), server_time = %now, "Health check passed");
                CheckHealthResult::ok(format!("Check successful; current timestamp = {}", now))
            }
            Err(e) => {
                warn!(instance = %state.key(), error = %e, "Health check probe failed");
                // A session that cannot answer the probe is not worth keeping.
                conn.discard();
                CheckHealthResult::error(single_line(&format!("Health check failed: {}", e)))
            }
        }
    }
}

fn read_server_time<C: Connection>(conn: &mut C, sql: &str) -> Result<String, DbError> {
    let mut cursor = conn.query(sql)?;
    if cursor.columns()?.is_empty() {
        return Err(DbError::Metadata("probe returned no columns".to_string()));
    }
    let row = cursor
        .next_row()?
        .ok_or_else(|| DbError::Fetch("probe returned no rows".to_string()))?;
    match row.get_raw(0) {
        Some(DbValue::Null) | None => Err(DbError::TypeConversion(
            "probe returned NULL".to_string(),
        )),
        Some(value) => Ok(value.to_string()),
    }
}
