//! tsbridge test utilities
//!
//! In-memory driver with fault injection and lease accounting, plus fixtures
//! for instance settings and query batches.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tsbridge_test_utils::{ScriptedDriver, fixtures};
//!
//! let driver = ScriptedDriver::new();
//! driver.script_rows("select 1", &["time", "v"], vec![fixtures::row("2024-01-01 00:00:00", &[1])]);
//! driver.script_execute_error("select broken", "SQL0204N  \"X\" is an undefined name.");
//!
//! // ... run the engine ...
//!
//! assert_eq!(driver.connects(), 1);
//! ```

pub mod fixtures;
pub mod scripted;

pub use scripted::{RowHook, Script, ScriptedConnection, ScriptedDriver, SCRIPTED_PROBE_SQL};
