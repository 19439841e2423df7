//! Source extraction.
//!
//! Evaluates every substitution's source expression, classifies the result
//! and appends it to the extraction cache under the substitution's target
//! path. A failing or empty expression never aborts the mapping: it yields
//! an IGNORE value for its target path.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use dynmapper_core::{
    MapperError, RepairStrategy, Substitution, SubstituteValue, TargetApi, ValueType,
};

use crate::context::ProcessingContext;
use crate::evaluator::ExpressionEvaluator;

/// Fills the extraction cache of a context.
pub struct SourceExtractor {
    evaluator: Arc<dyn ExpressionEvaluator>,
    time_path: String,
}

impl SourceExtractor {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>, time_path: impl Into<String>) -> Self {
        Self {
            evaluator,
            time_path: time_path.into(),
        }
    }

    pub fn extract(&self, ctx: &mut ProcessingContext<'_>) {
        let mapping = ctx.mapping;
        for substitution in &mapping.substitutions {
            self.extract_one(ctx, substitution);
        }

        let has_time = mapping
            .substitutions
            .iter()
            .any(|s| s.path_target == self.time_path);
        if !has_time && mapping.target_api != TargetApi::Inventory {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            trace!(path_target = %self.time_path, time = %now, "Synthesized time");
            ctx.extraction_cache
                .entry(self.time_path.clone())
                .or_default()
                .push(SubstituteValue::new(
                    Value::String(now),
                    ValueType::Textual,
                    RepairStrategy::Default,
                ));
            ctx.cardinality.insert(self.time_path.clone(), 1);
        }
    }

    fn extract_one(&self, ctx: &mut ProcessingContext<'_>, substitution: &Substitution) {
        let target = substitution.path_target.clone();
        let strategy = substitution.repair_strategy;

        let extracted = match self.evaluator.evaluate(&substitution.path_source, &ctx.payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    mapping = %ctx.mapping.id,
                    path_source = %substitution.path_source,
                    error = %e,
                    "Expression evaluation failed, value ignored"
                );
                ctx.add_error(MapperError::ExpressionEvaluation(e).to_string());
                None
            }
        };

        let (values, cardinality) = match extracted {
            None => {
                debug!(
                    mapping = %ctx.mapping.id,
                    path_source = %substitution.path_source,
                    "No substitution value found"
                );
                (vec![SubstituteValue::ignore(strategy)], 1)
            }
            Some(Value::Array(items)) if substitution.expand_array => {
                if items.is_empty() {
                    debug!(
                        mapping = %ctx.mapping.id,
                        path_source = %substitution.path_source,
                        "Expanded array is empty"
                    );
                    (vec![SubstituteValue::ignore(strategy)], 1)
                } else {
                    let n = items.len();
                    let values = items
                        .into_iter()
                        .map(|item| {
                            SubstituteValue::classify_element(item, strategy).with_expand_array(true)
                        })
                        .collect();
                    (values, n)
                }
            }
            Some(value) => (
                vec![SubstituteValue::classify(value, strategy)
                    .with_expand_array(substitution.expand_array)],
                1,
            ),
        };

        trace!(
            mapping = %ctx.mapping.id,
            path_target = %target,
            count = values.len(),
            "Extracted substitution values"
        );
        ctx.extraction_cache
            .entry(target.clone())
            .or_default()
            .extend(values);
        ctx.cardinality.insert(target, cardinality);
    }
}
