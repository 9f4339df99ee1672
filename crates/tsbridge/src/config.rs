//! Service-level configuration.

use std::time::Duration;

use tsbridge_db::{PoolConfig, SessionPolicy};

/// Pool sizing and session lifetimes for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub pool: PoolConfig,
    /// Lifetime of sessions leased for data queries
    pub data_session: SessionPolicy,
    /// Lifetime of sessions leased for health probes
    pub health_session: SessionPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            data_session: SessionPolicy::data_query(),
            health_session: SessionPolicy::health_check(),
        }
    }
}

impl ServiceConfig {
    pub fn with_pool_size(mut self, max_connections: usize) -> Self {
        self.pool = self.pool.with_max_connections(max_connections);
        self
    }

    /// `None` waits indefinitely for a free session.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool = self.pool.with_acquire_timeout(timeout);
        self
    }

    pub fn with_data_session(mut self, policy: SessionPolicy) -> Self {
        self.data_session = policy;
        self
    }

    pub fn with_health_session(mut self, policy: SessionPolicy) -> Self {
        self.health_session = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.pool.max_connections, 100);
        assert_eq!(config.pool.acquire_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.data_session.max_lifetime, Duration::from_secs(90));
        assert_eq!(config.health_session.max_lifetime, Duration::from_secs(60));
    }

    #[test]
    fn test_builders() {
        let config = ServiceConfig::default()
            .with_pool_size(4)
            .with_acquire_timeout(None);
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.acquire_timeout, None);
    }
}
