//! Mapping evaluation pipeline.
//!
//! ```text
//! raw payload ─▶ deserialize ─▶ enrich ─▶ filter ─▶ extract ─▶ resolve cardinality
//!                                                                  │
//!              ┌───────────────── for each fan-out index ◀─────────┘
//!              ▼
//!        identity ─▶ compose ─▶ emit (dispatch unless dry run)
//! ```
//!
//! Fan-out indices are processed strictly in order: device creation for
//! index `i` is visible before index `i + 1` resolves its identity.
//! Independent evaluations share nothing and may run concurrently.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use dynmapper_core::{
    C8yRequest, JsonPath, MapperConfig, MapperError, Mapping, RequestSummary, Result,
    SubstituteValue, TargetApi,
};

use crate::cardinality::CardinalityResolver;
use crate::client::{IdentityClient, PlatformApiClient};
use crate::composer::TargetComposer;
use crate::context::{Deadline, ProcessingContext, ProcessingState};
use crate::deserializer::deserializer_for;
use crate::emitter::RequestEmitter;
use crate::evaluator::{ExpressionEvaluator, JsonPathEvaluator};
use crate::extractor::SourceExtractor;
use crate::identity::{DeviceRef, IdentityResolver};

/// One inbound message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub topic: String,
    pub key: Option<String>,
}

impl InboundMessage {
    pub fn new(payload: impl Into<Vec<u8>>, topic: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            topic: topic.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub mapping_id: String,
    pub fan_out: usize,
    pub requests: Vec<C8yRequest>,
    /// Non-fatal problems (failed expressions, dispatch errors, ...).
    pub errors: Vec<String>,
    /// The filter expression rejected the message.
    pub ignored: bool,
    pub state: ProcessingState,
}

impl ProcessingResult {
    pub fn summary(&self) -> RequestSummary {
        RequestSummary::from_requests(&self.requests)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.requests.iter().any(C8yRequest::has_error)
    }
}

/// Evaluates mappings against inbound messages.
pub struct MappingProcessor {
    config: MapperConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    identity: Arc<dyn IdentityClient>,
    platform: Arc<dyn PlatformApiClient>,
    deadline: Option<Duration>,
}

impl MappingProcessor {
    pub fn new(
        config: MapperConfig,
        identity: Arc<dyn IdentityClient>,
        platform: Arc<dyn PlatformApiClient>,
    ) -> Self {
        Self {
            config,
            evaluator: Arc::new(JsonPathEvaluator::new()),
            identity,
            platform,
            deadline: None,
        }
    }

    /// Replace the expression language.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Time budget for the platform calls of each evaluation. Calls still
    /// running when it expires are recorded as timed out.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Evaluate one message.
    #[instrument(skip_all, fields(mapping = %mapping.id, topic = %topic))]
    pub async fn evaluate(
        &self,
        mapping: &Mapping,
        raw: &[u8],
        topic: &str,
        key: Option<&str>,
    ) -> Result<ProcessingResult> {
        mapping.validate()?;
        let template = mapping.parsed_target_template()?;

        let mut ctx = ProcessingContext::new(mapping, topic)
            .with_key(key.map(str::to_string))
            .with_send_payload(self.config.send_payload)
            .with_log_payload(self.config.log_payload)
            .with_deadline(self.deadline.map(Deadline::after));

        let deserializer = deserializer_for(mapping.mapping_type, &self.config)?;
        ctx.payload = deserializer.deserialize(raw).map_err(|e| {
            warn!(mapping = %mapping.id, error = %e, "Could not deserialize payload");
            MapperError::Deserialization(e)
        })?;
        ctx.transition(ProcessingState::Deserialized);
        ctx.enrich_payload();

        if !self.passes_filter(&ctx) {
            info!(mapping = %mapping.id, "Message ignored by filter");
            ctx.ignored = true;
            ctx.transition(ProcessingState::Ignored);
            return Ok(finish(ctx, 0));
        }

        SourceExtractor::new(self.evaluator.clone(), self.config.time_path.clone())
            .extract(&mut ctx);
        ctx.transition(ProcessingState::Extracted);

        let fan_out = CardinalityResolver::resolve(&mut ctx);
        ctx.transition(ProcessingState::Resolved { fan_out });

        let resolver = IdentityResolver::new(
            self.identity.clone(),
            self.platform.clone(),
            self.config.test_device_type.clone(),
        );
        let emitter = RequestEmitter::new(self.platform.clone(), self.identity.clone());

        for index in 0..fan_out {
            let device = self.resolve_device(&mut ctx, &resolver, index).await?;

            let composition =
                TargetComposer::compose(&template, &ctx.extraction_cache, index, &skipped_paths(mapping));
            for e in composition.errors {
                ctx.add_error(e);
            }
            let payload = place_identifier(mapping, composition.payload, &device)?;
            ctx.transition(ProcessingState::Composed { index });

            emitter.emit(&mut ctx, index, payload, &device).await;
        }

        ctx.transition(ProcessingState::Completed);
        let result = finish(ctx, fan_out);
        debug!(mapping = %result.mapping_id, summary = %result.summary(), "Evaluation finished");
        Ok(result)
    }

    /// Evaluate independent messages for the same mapping concurrently.
    pub async fn evaluate_all(
        &self,
        mapping: &Mapping,
        messages: &[InboundMessage],
    ) -> Vec<Result<ProcessingResult>> {
        join_all(messages.iter().map(|m| {
            self.evaluate(mapping, &m.payload, &m.topic, m.key.as_deref())
        }))
        .await
    }

    fn passes_filter(&self, ctx: &ProcessingContext<'_>) -> bool {
        let filter = match ctx.mapping.filter_mapping.as_deref() {
            Some(f) if !f.trim().is_empty() => f,
            _ => return true,
        };
        match self.evaluator.evaluate(filter, &ctx.payload) {
            Ok(result) => {
                let pass = result.as_ref().is_some_and(is_truthy);
                debug!(mapping = %ctx.mapping.id, filter, pass, "Applied filter");
                pass
            }
            Err(e) => {
                error!(mapping = %ctx.mapping.id, filter, error = %e, "Filter evaluation failed");
                false
            }
        }
    }

    /// Device of one fan-out index.
    async fn resolve_device(
        &self,
        ctx: &mut ProcessingContext<'_>,
        resolver: &IdentityResolver,
        index: usize,
    ) -> Result<DeviceRef> {
        let mapping = ctx.mapping;
        let Some(substitution) = mapping.device_identifier_substitution() else {
            return Ok(DeviceRef::default());
        };
        let raw = ctx
            .extraction_cache
            .get(&substitution.path_target)
            .and_then(|values| values.get(index))
            .and_then(identifier_text);

        if !substitution.resolve_to_external_id {
            return Ok(match raw {
                Some(id) if mapping.target_api != TargetApi::Inventory => DeviceRef::internal(id),
                Some(id) => DeviceRef {
                    internal_id: mapping.update_existing_device.then_some(id),
                    found: mapping.update_existing_device,
                    ..DeviceRef::default()
                },
                None => DeviceRef::default(),
            });
        }

        let Some(external_id) = raw else {
            return Err(MapperError::UnresolvedIdentifier {
                external_id: String::new(),
                external_id_type: mapping.external_id_type.clone(),
            });
        };

        if mapping.target_api != TargetApi::Inventory {
            return resolver.resolve(ctx, &external_id, index).await;
        }

        // inventory: the object itself is the device
        if let Some((Some(id), Some(request))) = ctx.created_device(&external_id).cloned() {
            debug!(
                mapping = %mapping.id,
                external_id = %external_id,
                "Updating object created earlier in this evaluation"
            );
            return Ok(DeviceRef {
                external_id: Some(external_id),
                internal_id: Some(id),
                found: true,
                predecessor: Some(request),
                blocked: None,
            });
        }
        let found = match resolver.lookup(ctx, &external_id).await {
            Ok(found) => found,
            Err(timeout) => {
                return Ok(DeviceRef {
                    external_id: Some(external_id),
                    blocked: Some(timeout),
                    ..DeviceRef::default()
                })
            }
        };
        let patch = found.is_some() && mapping.update_existing_device;
        let internal_id = match found {
            Some(id) if patch => Some(id),
            _ if !ctx.send_payload => Some(resolver.synthesized_inventory_id(ctx, &external_id)),
            _ => None,
        };
        Ok(DeviceRef {
            external_id: Some(external_id),
            internal_id,
            found: patch,
            predecessor: None,
            blocked: None,
        })
    }
}

/// Paths the composer must not write from raw extracted values.
fn skipped_paths(mapping: &Mapping) -> Vec<&str> {
    match mapping.device_identifier_substitution() {
        Some(s) if s.resolve_to_external_id => vec![s.path_target.as_str()],
        _ => Vec::new(),
    }
}

/// Write the resolved device id at the API identifier path, or strip the
/// identifier from inventory objects.
fn place_identifier(mapping: &Mapping, mut payload: Value, device: &DeviceRef) -> Result<Value> {
    let path = JsonPath::parse(mapping.target_api.identifier_path())
        .map_err(|e| MapperError::InvalidMapping(e.to_string()))?;

    if mapping.target_api == TargetApi::Inventory {
        path.remove(&mut payload);
        return Ok(payload);
    }
    if let Some(id) = &device.internal_id {
        path.set(&mut payload, Value::String(id.clone()))
            .map_err(|e| MapperError::InvalidTargetTemplate(e.to_string()))?;
    }
    Ok(payload)
}

fn identifier_text(value: &SubstituteValue) -> Option<String> {
    if value.is_missing_or_null() {
        return None;
    }
    match &value.value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::String(_) => None,
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Truthiness of a filter result: `true`, or a string `true`/`1`/`yes`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

fn finish(ctx: ProcessingContext<'_>, fan_out: usize) -> ProcessingResult {
    ProcessingResult {
        mapping_id: ctx.mapping.id.clone(),
        fan_out,
        requests: ctx.requests,
        errors: ctx.errors,
        ignored: ctx.ignored,
        state: ctx.state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("YES")));
        assert!(is_truthy(&json!(" 1 ")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("no")));
        assert!(!is_truthy(&json!(1)));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn test_identifier_text() {
        let d = dynmapper_core::RepairStrategy::Default;
        assert_eq!(
            identifier_text(&SubstituteValue::classify(json!(" berlin_01 "), d)),
            Some("berlin_01".to_string())
        );
        assert_eq!(
            identifier_text(&SubstituteValue::classify(json!(4711), d)),
            Some("4711".to_string())
        );
        assert_eq!(identifier_text(&SubstituteValue::classify(json!(""), d)), None);
        assert_eq!(identifier_text(&SubstituteValue::ignore(d)), None);
    }

    #[test]
    fn test_place_identifier() {
        let mapping = Mapping::new("m", TargetApi::Operation, "{}");
        let out = place_identifier(&mapping, json!({"c8y_Restart": {}}), &DeviceRef::internal("9"))
            .unwrap();
        assert_eq!(out, json!({"c8y_Restart": {}, "deviceId": "9"}));

        let inventory = Mapping::new("m", TargetApi::Inventory, "{}");
        let out = place_identifier(&inventory, json!({"id": "x", "name": "n"}), &DeviceRef::default())
            .unwrap();
        assert_eq!(out, json!({"name": "n"}));
    }
}
