//! tsbridge engine
//!
//! Runs ad-hoc SQL against a relational backend and reshapes each result
//! set into a time-series frame: one leading time field followed by int64
//! fields, rows in result-set order.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tsbridge::{Datasource, ServiceConfig};
//! use tsbridge_db::DuckDbDriver;
//!
//! let datasource = Datasource::new(DuckDbDriver, ServiceConfig::default());
//! let response = datasource.query_data(request).await?;
//! for (ref_id, data) in &response.responses {
//!     // frames or a per-query error
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod frame;
pub mod health;
pub mod instance;
pub mod response;

pub use cancel::{CancelOnDrop, CancelToken};
pub use config::ServiceConfig;
pub use datasource::Datasource;
pub use error::{ConfigError, QueryError, QueryErrorKind, ServiceError};
pub use executor::{PreparedQuery, QueryExecutor};
pub use frame::{assemble, ColumnDescriptor, ColumnRole, FrameError, TimeSeriesFrame, TypedColumns};
pub use health::HealthProber;
pub use instance::{settings_fingerprint, InstanceConfig, InstanceRegistry, InstanceState};
pub use response::{DataResponse, QueryDataResponse};
