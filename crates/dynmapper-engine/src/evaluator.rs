//! Path expression evaluation.
//!
//! The engine only depends on the [`ExpressionEvaluator`] trait; any
//! expression language can be plugged in. [`JsonPathEvaluator`] is the
//! bundled implementation.

use std::panic::{catch_unwind, AssertUnwindSafe};

use jsonpath_lib::select;
use serde_json::Value;
use tracing::trace;

use dynmapper_core::ExpressionError;

/// Evaluates a textual expression against a JSON document.
pub trait ExpressionEvaluator: Send + Sync {
    /// `Ok(None)` means the expression matched nothing.
    fn evaluate(&self, expression: &str, document: &Value)
        -> Result<Option<Value>, ExpressionError>;
}

/// JSONPath evaluator.
///
/// Bare paths (`temp`, `source.id`, `_TOPIC_LEVEL_[1]`) are read relative to
/// the document root. A single hit yields the node itself, several hits are
/// collected into an array in document order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathEvaluator;

impl JsonPathEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn normalize(expression: &str) -> String {
        let trimmed = expression.trim();
        if trimmed.starts_with('$') {
            trimmed.to_string()
        } else if trimmed.starts_with('[') {
            format!("${}", trimmed)
        } else {
            format!("$.{}", trimmed)
        }
    }

    /// Rejects slices with a zero step (`[1:5:0]`), which the JSONPath
    /// engine cannot iterate.
    fn check_slices(path: &str) -> Result<(), String> {
        let mut rest = path;
        while let Some(open) = rest.find('[') {
            let after = &rest[open + 1..];
            let Some(close) = after.find(']') else {
                break;
            };
            let inner = after[..close].trim();
            if !inner.starts_with('?') && !inner.starts_with('(') {
                let parts: Vec<&str> = inner.split(':').collect();
                if parts.len() == 3 {
                    let step = parts[2].trim().trim_start_matches(['-', '+']);
                    if !step.is_empty() && step.chars().all(|c| c == '0') {
                        return Err(format!("slice step must not be zero: [{}]", inner));
                    }
                }
            }
            rest = &after[close + 1..];
        }
        Ok(())
    }
}

impl ExpressionEvaluator for JsonPathEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        document: &Value,
    ) -> Result<Option<Value>, ExpressionError> {
        let path = Self::normalize(expression);
        Self::check_slices(&path).map_err(|reason| ExpressionError::new(expression, reason))?;
        let hits = catch_unwind(AssertUnwindSafe(|| select(document, &path)))
            .map_err(|_| ExpressionError::new(expression, "expression engine panicked"))?
            .map_err(|e| ExpressionError::new(expression, e.to_string()))?;
        trace!(expression = %path, hits = hits.len(), "Evaluated expression");

        Ok(match hits.len() {
            0 => None,
            1 => Some(hits[0].clone()),
            _ => Some(Value::Array(hits.into_iter().cloned().collect())),
        })
    }
}
