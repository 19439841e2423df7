//! Per-invocation processing state.
//!
//! A [`ProcessingContext`] lives for exactly one mapping evaluation. It is
//! owned by the evaluating task and never shared.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use dynmapper_core::{C8yRequest, DispatchError, Mapping, SubstituteValue};

/// Key receiving the topic levels of the inbound message.
pub const TOKEN_TOPIC_LEVEL: &str = "_TOPIC_LEVEL_";
/// Key receiving message metadata (key, target API).
pub const TOKEN_CONTEXT_DATA: &str = "_CONTEXT_DATA_";

/// Ordered extraction cache: target path to extracted values.
pub type ExtractionCache = IndexMap<String, Vec<SubstituteValue>>;

/// Lifecycle of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    Created,
    Deserialized,
    Extracted,
    Resolved { fan_out: usize },
    Composed { index: usize },
    Dispatched { index: usize },
    Failed { index: usize },
    /// Every fan-out index reached a terminal state.
    Completed,
    /// The filter expression rejected the message.
    Ignored,
}

/// Caller-imposed time budget for the platform calls of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut`, failing with [`DispatchError::Timeout`] once the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DispatchError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| DispatchError::Timeout(self.budget.as_millis() as u64))
    }
}

/// State threaded through the pipeline.
#[derive(Debug)]
pub struct ProcessingContext<'a> {
    pub mapping: &'a Mapping,
    pub topic: String,
    /// Key of the inbound message, when the transport carries one.
    pub key: Option<String>,
    pub payload: Value,
    pub cardinality: IndexMap<String, usize>,
    pub extraction_cache: ExtractionCache,
    pub requests: Vec<C8yRequest>,
    /// Dispatch to the platform; false means dry run.
    pub send_payload: bool,
    pub log_payload: bool,
    /// Non-fatal problems recorded along the way.
    pub errors: Vec<String>,
    pub state: ProcessingState,
    pub ignored: bool,
    pub deadline: Option<Deadline>,
    /// Devices created (or synthesized) in this context: external id to
    /// internal id and the index of the device-create record.
    created_devices: HashMap<String, (Option<String>, Option<usize>)>,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(mapping: &'a Mapping, topic: impl Into<String>) -> Self {
        Self {
            mapping,
            topic: topic.into(),
            key: None,
            payload: Value::Null,
            cardinality: IndexMap::new(),
            extraction_cache: IndexMap::new(),
            requests: Vec::new(),
            send_payload: false,
            log_payload: mapping.debug,
            errors: Vec::new(),
            state: ProcessingState::Created,
            ignored: false,
            deadline: None,
            created_devices: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    pub fn with_send_payload(mut self, send: bool) -> Self {
        self.send_payload = send;
        self
    }

    pub fn with_log_payload(mut self, log: bool) -> Self {
        self.log_payload = self.mapping.debug || log;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Deadline>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn transition(&mut self, next: ProcessingState) {
        debug!(
            mapping = %self.mapping.id,
            from = ?self.state,
            to = ?next,
            "Processing state transition"
        );
        self.state = next;
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Append a request record and return its index.
    pub fn push_request(&mut self, request: C8yRequest) -> usize {
        if let Some(p) = request.predecessor {
            debug_assert!(p < self.requests.len(), "predecessor must precede");
        }
        self.requests.push(request);
        self.requests.len() - 1
    }

    /// Insert topic levels and message metadata into an object payload.
    pub fn enrich_payload(&mut self) {
        let levels = split_topic(&self.topic);
        let api = self.mapping.target_api.as_str();
        let key = self.key.clone();
        match &mut self.payload {
            Value::Object(map) => {
                map.insert(TOKEN_TOPIC_LEVEL.to_string(), json!(levels));
                if let Some(key) = key {
                    map.insert(
                        TOKEN_CONTEXT_DATA.to_string(),
                        json!({ "key": key, "api": api }),
                    );
                }
            }
            _ => {
                debug!(
                    mapping = %self.mapping.id,
                    "Payload is not a JSON object, topic levels not added"
                );
            }
        }
    }

    pub fn created_device(&self, external_id: &str) -> Option<&(Option<String>, Option<usize>)> {
        self.created_devices.get(external_id)
    }

    pub fn remember_device(
        &mut self,
        external_id: &str,
        internal_id: Option<String>,
        request_index: Option<usize>,
    ) {
        self.created_devices
            .insert(external_id.to_string(), (internal_id, request_index));
    }

    /// Run a platform call under the deadline, if one is set.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DispatchError>
    where
        F: Future<Output = T>,
    {
        match &self.deadline {
            Some(deadline) => deadline.run(fut).await,
            None => Ok(fut.await),
        }
    }
}

/// Topic levels without leading or trailing separators.
pub fn split_topic(topic: &str) -> Vec<String> {
    let trimmed = topic.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').map(str::to_string).collect()
}
