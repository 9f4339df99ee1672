//! Request handling.
//!
//! `Datasource` owns the shared pool and the instance registry and answers
//! the host's two requests. Each batch runs on a blocking worker, leases at
//! most one session, and executes its queries sequentially on it.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use tsbridge_db::{ConnectionPool, Driver, PoolStatus};
use tsbridge_protocol::{CheckHealthRequest, CheckHealthResult, QueryDataRequest};

use crate::cancel::CancelToken;
use crate::config::ServiceConfig;
use crate::error::{QueryError, ServiceError};
use crate::executor::{PreparedQuery, QueryExecutor};
use crate::health::HealthProber;
use crate::instance::InstanceRegistry;
use crate::response::{DataResponse, QueryDataResponse};

pub struct Datasource<D: Driver> {
    registry: Arc<InstanceRegistry<D>>,
    config: ServiceConfig,
}

impl<D: Driver> Clone for Datasource<D> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: self.config,
        }
    }
}

impl<D: Driver> Datasource<D> {
    /// Create the process-wide pool for `driver` and an empty registry.
    pub fn new(driver: D, config: ServiceConfig) -> Self {
        let pool = ConnectionPool::new(driver, config.pool);
        Self::with_pool(pool, config)
    }

    pub fn with_pool(pool: Arc<ConnectionPool<D>>, config: ServiceConfig) -> Self {
        Self {
            registry: Arc::new(InstanceRegistry::new(pool)),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry<D>> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<D>> {
        self.registry.pool()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool().status()
    }

    /// Run a batch on the calling thread.
    ///
    /// Configuration and lease failures fail the batch; everything else is
    /// reported in the failing query's slot.
    pub fn query_data_blocking(
        &self,
        req: &QueryDataRequest,
        cancel: &CancelToken,
    ) -> Result<QueryDataResponse, ServiceError> {
        let started = Instant::now();
        let state = self.registry.resolve(&req.plugin_context)?;

        let prepared: Vec<(&str, PreparedQuery)> = req
            .queries
            .iter()
            .map(|q| (q.ref_id.as_str(), QueryExecutor::prepare(q)))
            .collect();

        let mut conn = if prepared.iter().any(|(_, p)| p.needs_connection()) {
            Some(state.open(self.config.data_session).map_err(|e| {
                warn!(instance = %state.key(), error = %e, "Failed to lease connection");
                e
            })?)
        } else {
            None
        };

        let mut response = QueryDataResponse::new();
        for (ref_id, query) in prepared {
            let result = match (query, conn.as_mut()) {
                (PreparedQuery::Runnable(sql), Some(conn)) => {
                    QueryExecutor::execute_prepared(conn, ref_id, &sql, cancel)
                }
                (PreparedQuery::Runnable(_), None) => {
                    DataResponse::from_error(QueryError::execution("no session leased"))
                }
                (other, _) => other.resolve_offline().unwrap_or_default(),
            };
            response.insert(ref_id, result);
        }
        drop(conn);

        info!(
            instance = %state.key(),
            name = %state.name(),
            queries = req.queries.len(),
            errors = response.error_count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "QueryData complete"
        );
        Ok(response)
    }

    /// Probe the instance on the calling thread.
    ///
    /// Unusable settings are reported as an `ERROR` result.
    pub fn check_health_blocking(&self, req: &CheckHealthRequest) -> CheckHealthResult {
        match self.registry.resolve(&req.plugin_context) {
            Ok(state) => HealthProber::new(self.config.health_session).probe(&state),
            Err(e) => {
                warn!(instance = %req.plugin_context.instance_key, error = %e, "Invalid instance settings");
                CheckHealthResult::error(e.to_string())
            }
        }
    }

    /// Run a batch on a blocking worker. Dropping the future cancels the
    /// batch between rows.
    pub async fn query_data(&self, req: QueryDataRequest) -> Result<QueryDataResponse, ServiceError> {
        let cancel = CancelToken::new();
        let guard = cancel.cancel_on_drop();
        let this = self.clone();
        let result = tokio::task::spawn_blocking(move || this.query_data_blocking(&req, &cancel))
            .await
            .map_err(|e| ServiceError::Worker(e.to_string()))?;
        guard.disarm();
        result
    }

    pub async fn check_health(&self, req: CheckHealthRequest) -> Result<CheckHealthResult, ServiceError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.check_health_blocking(&req))
            .await
            .map_err(|e| ServiceError::Worker(e.to_string()))
    }

    /// Dispose every instance and close the pool.
    pub fn shutdown(&self) {
        self.registry.dispose_all();
        self.pool().close();
    }
}
