//! Wire types exchanged between the visualization host and tsbridge.
//!
//! The host delivers two kinds of request:
//!
//! - `QueryDataRequest`: a batch of `DataQuery` entries sharing one plugin context
//! - `CheckHealthRequest`: a liveness probe for one configured instance
//!
//! Each `DataQuery` carries an opaque JSON payload that decodes into a
//! `QueryModel` (`{"hide": bool, "queryText": string}`). Instance configuration
//! arrives as `InstanceSettings` with the password delivered separately in the
//! decrypted secure settings.

pub mod defaults;
pub mod error;
pub mod types;

pub use error::ProtocolError;
pub use types::{
    CheckHealthRequest, CheckHealthResult, DataQuery, HealthStatus, InstanceSettings,
    PluginContext, QueryDataRequest, QueryModel,
};
