//! Request records emitted by an evaluation.
//!
//! Records live in an arena (`Vec<C8yRequest>`) and point to an earlier
//! record through `predecessor`, forming a chain where a device-upsert step
//! gates the content request that depends on it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::DispatchError;
use crate::model::TargetApi;

/// HTTP-style verb of a platform request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Post,
    Patch,
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMethod::Post => f.write_str("POST"),
            RequestMethod::Patch => f.write_str("PATCH"),
        }
    }
}

/// Outcome of a request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Composed but not sent (dry run).
    Recorded,
    Dispatched,
    Failed,
}

/// One request in the emitted chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct C8yRequest {
    /// Index of the record that must succeed first.
    pub predecessor: Option<usize>,
    pub method: RequestMethod,
    /// Platform-internal id of the device the object belongs to.
    pub source_device_ref: Option<String>,
    pub external_id_type: Option<String>,
    /// External id the device was resolved from, if any.
    pub external_id: Option<String>,
    pub request: Value,
    pub response: Option<Value>,
    pub error: Option<String>,
    #[serde(rename = "targetAPI")]
    pub target_api: TargetApi,
    /// Fan-out index this record was produced for.
    pub index: usize,
}

impl C8yRequest {
    pub fn new(method: RequestMethod, target_api: TargetApi, request: Value, index: usize) -> Self {
        Self {
            predecessor: None,
            method,
            source_device_ref: None,
            external_id_type: None,
            external_id: None,
            request,
            response: None,
            error: None,
            target_api,
            index,
        }
    }

    pub fn with_predecessor(mut self, predecessor: Option<usize>) -> Self {
        self.predecessor = predecessor;
        self
    }

    pub fn with_source_device(mut self, device_ref: Option<String>) -> Self {
        self.source_device_ref = device_ref;
        self
    }

    pub fn with_external_id(mut self, external_id_type: &str, external_id: &str) -> Self {
        self.external_id_type = Some(external_id_type.to_string());
        self.external_id = Some(external_id.to_string());
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn set_error(&mut self, error: &DispatchError) {
        self.error = Some(error.to_string());
    }

    pub fn status(&self) -> RequestStatus {
        if self.error.is_some() {
            RequestStatus::Failed
        } else if self.response.is_some() {
            RequestStatus::Dispatched
        } else {
            RequestStatus::Recorded
        }
    }
}

/// Partial-success counts over a request chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub total: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub recorded: usize,
}

impl RequestSummary {
    pub fn from_requests(requests: &[C8yRequest]) -> Self {
        let mut summary = Self {
            total: requests.len(),
            ..Self::default()
        };
        for request in requests {
            match request.status() {
                RequestStatus::Dispatched => summary.dispatched += 1,
                RequestStatus::Failed => summary.failed += 1,
                RequestStatus::Recorded => summary.recorded += 1,
            }
        }
        summary
    }
}

impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests: {} dispatched, {} failed, {} recorded",
            self.total, self.dispatched, self.failed, self.recorded
        )
    }
}
