//! Target composition.
//!
//! For one fan-out index, copies the target template and writes every
//! cached target path, applying the repair strategy of the value:
//!
//! | Strategy | value missing for the index |
//! |---|---|
//! | DEFAULT | template value untouched |
//! | USE_FIRST_VALUE_OF_ARRAY | first value of the list |
//! | USE_LAST_VALUE_OF_ARRAY | last value of the list |
//! | IGNORE | path not set |
//! | REMOVE_IF_MISSING / REMOVE_IF_NULL | path deleted |
//! | CREATE_IF_MISSING | path created (null) if the template lacks it |
//!
//! Composition is a pure function of template, cache and index.

use serde_json::Value;
use tracing::{trace, warn};

use dynmapper_core::{JsonPath, RepairStrategy, SubstituteValue};

use crate::context::ExtractionCache;

/// One composed object.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub payload: Value,
    /// Paths that could not be written.
    pub errors: Vec<String>,
}

pub struct TargetComposer;

impl TargetComposer {
    /// Compose the object for `index`, leaving out the paths in `skip`.
    pub fn compose(
        template: &Value,
        cache: &ExtractionCache,
        index: usize,
        skip: &[&str],
    ) -> Composition {
        let mut payload = template.clone();
        let mut errors = Vec::new();

        for (path_target, values) in cache {
            if skip.contains(&path_target.as_str()) {
                continue;
            }
            let path = match JsonPath::parse(path_target) {
                Ok(p) => p,
                Err(e) => {
                    errors.push(format!("{}: {}", path_target, e));
                    continue;
                }
            };
            let substitute = pick(values, index);
            if let Err(e) = apply(&mut payload, &path, substitute, values) {
                warn!(path_target = %path_target, index, error = %e, "Could not set target path");
                errors.push(format!("{}: {}", path_target, e));
            }
        }

        Composition { payload, errors }
    }
}

/// Value for `index`, falling back to the repair strategy when the list is short.
fn pick(values: &[SubstituteValue], index: usize) -> Option<&SubstituteValue> {
    if let Some(v) = values.get(index) {
        return Some(v);
    }
    let strategy = values.last()?.repair_strategy;
    match strategy {
        RepairStrategy::UseFirstValueOfArray => values.first(),
        RepairStrategy::UseLastValueOfArray => values.last(),
        _ => None,
    }
}

fn apply(
    payload: &mut Value,
    path: &JsonPath,
    substitute: Option<&SubstituteValue>,
    values: &[SubstituteValue],
) -> Result<(), dynmapper_core::PathError> {
    let strategy = substitute
        .or_else(|| values.last())
        .map(|v| v.repair_strategy)
        .unwrap_or_default();

    let present = substitute.filter(|v| !v.is_ignore());
    let Some(substitute) = present else {
        match strategy {
            RepairStrategy::RemoveIfMissing | RepairStrategy::RemoveIfNull => {
                path.remove(payload);
            }
            RepairStrategy::CreateIfMissing if !path.contains(payload) => {
                path.set(payload, Value::Null)?;
            }
            _ => {}
        }
        return Ok(());
    };

    let typed = substitute.typed_value();
    if typed.is_null() && strategy.removes_missing() {
        path.remove(payload);
        return Ok(());
    }

    if path.is_root() {
        if let Value::Object(fields) = typed {
            if let Value::Object(target) = payload {
                target.extend(fields);
                return Ok(());
            }
            *payload = Value::Object(fields);
            return Ok(());
        }
    }

    trace!(path_target = %path, "Setting target path");
    path.set(payload, typed)
}
