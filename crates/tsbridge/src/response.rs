//! Batch response types.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::QueryError;
use crate::frame::TimeSeriesFrame;

/// Outcome of one query: frames on success, an error otherwise.
///
/// A hidden query yields neither.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataResponse {
    pub frames: Vec<TimeSeriesFrame>,
    pub error: Option<QueryError>,
}

impl DataResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_frame(frame: TimeSeriesFrame) -> Self {
        Self {
            frames: vec![frame],
            error: None,
        }
    }

    pub fn from_error(error: QueryError) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<Result<TimeSeriesFrame, QueryError>> for DataResponse {
    fn from(result: Result<TimeSeriesFrame, QueryError>) -> Self {
        match result {
            Ok(frame) => Self::from_frame(frame),
            Err(err) => Self::from_error(err),
        }
    }
}

/// Responses of a batch keyed by RefID. A repeated RefID keeps the last response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

impl QueryDataResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ref_id: impl Into<String>, response: DataResponse) {
        self.responses.insert(ref_id.into(), response);
    }

    pub fn get(&self, ref_id: &str) -> Option<&DataResponse> {
        self.responses.get(ref_id)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Number of responses carrying an error.
    pub fn error_count(&self) -> usize {
        self.responses.values().filter(|r| !r.is_ok()).count()
    }
}
