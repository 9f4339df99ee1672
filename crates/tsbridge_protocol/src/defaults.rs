//! Canonical default values shared by the engine and the launcher.

/// Upper bound on concurrent physical sessions held by the shared pool.
pub const DEFAULT_POOL_SIZE: usize = 100;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
/// Session lifetime applied to connections leased for data queries.
pub const DATA_SESSION_MAX_LIFETIME_SECS: u64 = 90;
/// Session lifetime applied to connections leased for health probes.
pub const HEALTH_SESSION_MAX_LIFETIME_SECS: u64 = 60;
pub const RESPONSE_FRAME_NAME: &str = "response";
/// Key of the password inside the decrypted secure settings.
pub const PASSWORD_SECRET_KEY: &str = "password";
pub const DEFAULT_INSTANCE_KEY: &str = "default";
