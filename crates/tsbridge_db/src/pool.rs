//! Process-wide connection pool.
//!
//! One `ConnectionPool` is created at startup and shared by every instance.
//! Physical sessions are keyed by their connection string; `open` reuses an
//! idle session for the same string unless it has outlived the caller's
//! `SessionPolicy`, and otherwise opens a new one. `max_connections` bounds the
//! number of physical sessions across all connection strings:
//!
//! - at capacity, an idle session belonging to another string is evicted
//! - with nothing idle, `open` blocks until a lease is released or the
//!   acquire timeout elapses
//!
//! Leases are `PooledConnection` guards. Dropping the guard (or calling
//! `close`) returns the session exactly once; sessions past their lifetime are
//! closed instead of going back to the idle list.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, info, warn};

use tsbridge_protocol::defaults::{
    DATA_SESSION_MAX_LIFETIME_SECS, DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_POOL_SIZE,
    HEALTH_SESSION_MAX_LIFETIME_SECS,
};

use crate::connection_string::ConnectionString;
use crate::driver::{Connection, Driver, RowCursor};
use crate::error::{DbError, PoolError};

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum physical sessions across all connection strings
    pub max_connections: usize,
    /// How long `open` may block at capacity (`None` waits forever)
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_POOL_SIZE,
            acquire_timeout: Some(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS)),
        }
    }
}

impl PoolConfig {
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Per-lease session policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Sessions older than this are recycled rather than reused
    pub max_lifetime: Duration,
}

impl SessionPolicy {
    pub const fn with_max_lifetime(max_lifetime: Duration) -> Self {
        Self { max_lifetime }
    }

    /// Policy for data query batches.
    pub const fn data_query() -> Self {
        Self::with_max_lifetime(Duration::from_secs(DATA_SESSION_MAX_LIFETIME_SECS))
    }

    /// Shorter-lived policy for health probes.
    pub const fn health_check() -> Self {
        Self::with_max_lifetime(Duration::from_secs(HEALTH_SESSION_MAX_LIFETIME_SECS))
    }

    fn is_expired(&self, opened_at: Instant) -> bool {
        opened_at.elapsed() >= self.max_lifetime
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub open: usize,
    pub idle: usize,
    pub leased: usize,
    pub max: usize,
}

struct IdleConnection<C> {
    conn: C,
    conn_str: ConnectionString,
    opened_at: Instant,
}

struct PoolState<C> {
    idle: Vec<IdleConnection<C>>,
    /// Physical sessions that exist (idle + leased + being opened)
    open: usize,
    leased: usize,
    closed: bool,
}

enum Lease<C> {
    Reused(IdleConnection<C>),
    New,
}

/// Bounded pool of driver sessions shared by all instances.
pub struct ConnectionPool<D: Driver> {
    driver: D,
    config: PoolConfig,
    state: Mutex<PoolState<D::Connection>>,
    available: Condvar,
}

impl<D: Driver> ConnectionPool<D> {
    pub fn new(driver: D, config: PoolConfig) -> Arc<Self> {
        let config = PoolConfig {
            max_connections: config.max_connections.max(1),
            ..config
        };
        info!(
            driver = driver.name(),
            max_connections = config.max_connections,
            "Connection pool created"
        );
        Arc::new(Self {
            driver,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                leased: 0,
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        PoolStatus {
            open: state.open,
            idle: state.idle.len(),
            leased: state.leased,
            max: self.config.max_connections,
        }
    }

    /// Lease a session for `conn_str`.
    pub fn open(
        self: &Arc<Self>,
        conn_str: &ConnectionString,
        policy: SessionPolicy,
    ) -> Result<PooledConnection<D>, PoolError> {
        let deadline = self.config.acquire_timeout.map(|limit| Instant::now() + limit);
        // Sessions retired while holding the lock are dropped after releasing it.
        let mut retired: Vec<D::Connection> = Vec::new();
        let mut state = self.lock_state();

        let lease = loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            let mut index = 0;
            while index < state.idle.len() {
                let candidate = &state.idle[index];
                if candidate.conn_str == *conn_str && policy.is_expired(candidate.opened_at) {
                    let stale = state.idle.swap_remove(index);
                    state.open -= 1;
                    retired.push(stale.conn);
                } else {
                    index += 1;
                }
            }

            if let Some(pos) = state.idle.iter().rposition(|c| c.conn_str == *conn_str) {
                let idle = state.idle.remove(pos);
                state.leased += 1;
                break Lease::Reused(idle);
            }

            if state.open < self.config.max_connections {
                state.open += 1;
                state.leased += 1;
                break Lease::New;
            }

            let oldest = state
                .idle
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.opened_at)
                .map(|(pos, _)| pos);
            if let Some(pos) = oldest {
                let victim = state.idle.remove(pos);
                state.open -= 1;
                debug!(
                    evicted = %victim.conn_str.fingerprint(),
                    "Evicting idle session to make room"
                );
                retired.push(victim.conn);
                continue;
            }

            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        drop(state);
                        warn!(
                            max_connections = self.config.max_connections,
                            "Connection pool exhausted"
                        );
                        return Err(PoolError::Timeout(
                            self.config.acquire_timeout.unwrap_or_default(),
                        ));
                    }
                    self.available
                        .wait_timeout(state, limit - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        };
        drop(state);
        drop(retired);

        match lease {
            Lease::Reused(idle) => Ok(PooledConnection {
                pool: Arc::clone(self),
                conn: Some(idle.conn),
                conn_str: idle.conn_str,
                opened_at: idle.opened_at,
                policy,
                discard: false,
            }),
            Lease::New => match self.driver.connect(conn_str) {
                Ok(conn) => {
                    debug!(
                        driver = self.driver.name(),
                        conn = %conn_str.fingerprint(),
                        "Opened new session"
                    );
                    Ok(PooledConnection {
                        pool: Arc::clone(self),
                        conn: Some(conn),
                        conn_str: conn_str.clone(),
                        opened_at: Instant::now(),
                        policy,
                        discard: false,
                    })
                }
                Err(err) => {
                    {
                        let mut state = self.lock_state();
                        state.open -= 1;
                        state.leased -= 1;
                    }
                    self.available.notify_one();
                    warn!(driver = self.driver.name(), error = %err, "Failed to open session");
                    Err(PoolError::connect(self.driver.name(), err))
                }
            },
        }
    }

    /// Close idle sessions for `conn_str`. Leased sessions are left alone.
    pub fn evict_idle(&self, conn_str: &ConnectionString) -> usize {
        let retired: Vec<IdleConnection<D::Connection>> = {
            let mut state = self.lock_state();
            let (matching, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|c| c.conn_str == *conn_str);
            state.idle = keep;
            state.open -= matching.len();
            matching
        };
        let count = retired.len();
        drop(retired);
        if count > 0 {
            self.available.notify_all();
        }
        count
    }

    /// Close all idle sessions and refuse new leases. Leased sessions close on release.
    pub fn close(&self) {
        let retired = {
            let mut state = self.lock_state();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.open -= idle.len();
            idle
        };
        info!(closed_idle = retired.len(), "Connection pool closed");
        drop(retired);
        self.available.notify_all();
    }

    fn release(
        &self,
        conn: D::Connection,
        conn_str: ConnectionString,
        opened_at: Instant,
        policy: SessionPolicy,
        discard: bool,
    ) {
        let mut state = self.lock_state();
        state.leased -= 1;
        if discard || state.closed || policy.is_expired(opened_at) {
            state.open -= 1;
            drop(state);
            drop(conn);
        } else {
            state.idle.push(IdleConnection {
                conn,
                conn_str,
                opened_at,
            });
            drop(state);
        }
        self.available.notify_one();
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<D::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A leased session; returns to the pool on drop.
pub struct PooledConnection<D: Driver> {
    pool: Arc<ConnectionPool<D>>,
    conn: Option<D::Connection>,
    conn_str: ConnectionString,
    opened_at: Instant,
    policy: SessionPolicy,
    discard: bool,
}

impl<D: Driver> PooledConnection<D> {
    pub fn connection_string(&self) -> &ConnectionString {
        &self.conn_str
    }

    /// Time since the physical session was opened.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Return the session to the pool.
    pub fn close(self) {}

    /// Close the physical session instead of returning it.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl<D: Driver> Connection for PooledConnection<D> {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DbError> {
        let conn = self.conn.as_mut().ok_or(DbError::Released)?;
        let span = debug_span!(
            "db.query",
            driver = self.pool.driver.name(),
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();
        let result = conn.query(sql);
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        result
    }
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

/// Stable low-cardinality identifier for a statement.
fn hash_sql(sql: &str) -> String {
    blake3::hash(sql.as_bytes()).to_hex()[..16].to_string()
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(
                conn,
                self.conn_str.clone(),
                self.opened_at,
                self.policy,
                self.discard,
            );
        }
    }
}

impl<D: Driver> fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("driver", &self.pool.driver.name())
            .field("conn", &self.conn_str)
            .field("age", &self.age())
            .finish()
    }
}
