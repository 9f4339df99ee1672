//! Errors raised while decoding host payloads.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The per-query JSON payload did not match `{"hide", "queryText"}`.
    #[error("invalid query payload for refId '{ref_id}': {source}")]
    InvalidQuery {
        ref_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings JSON: {0}")]
    InvalidSettings(#[from] serde_json::Error),
}
