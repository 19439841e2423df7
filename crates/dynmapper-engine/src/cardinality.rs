//! Fan-out resolution.
//!
//! Determines how many objects an evaluation emits and pads the other
//! extraction lists so every fan-out index can be addressed:
//!
//! 1. A single device entry is broadcast to the longest list.
//! 2. `fan_out = cardinality[device_key]`, or 1 without an identifier.
//! 3. Shorter lists are padded: one entry is broadcast, an empty list
//!    becomes IGNORE, otherwise the repair strategy decides.

use tracing::{debug, warn};

use dynmapper_core::{RepairStrategy, SubstituteValue};

use crate::context::{ExtractionCache, ProcessingContext};

pub struct CardinalityResolver;

impl CardinalityResolver {
    /// Resolve the fan-out count and reconcile the extraction cache.
    pub fn resolve(ctx: &mut ProcessingContext<'_>) -> usize {
        let device_key = ctx.mapping.device_key().to_string();
        let has_identifier = ctx.mapping.device_identifier_substitution().is_some();

        if has_identifier {
            broadcast_single_device(ctx, &device_key);
        }

        let fan_out = if has_identifier {
            ctx.cardinality.get(&device_key).copied().unwrap_or(1).max(1)
        } else {
            1
        };

        pad(&mut ctx.extraction_cache, fan_out);
        debug!(
            mapping = %ctx.mapping.id,
            device_key = %device_key,
            fan_out,
            "Resolved cardinality"
        );
        fan_out
    }
}

fn broadcast_single_device(ctx: &mut ProcessingContext<'_>, device_key: &str) {
    let max_len = ctx
        .extraction_cache
        .values()
        .map(Vec::len)
        .max()
        .unwrap_or(0);

    if let Some(devices) = ctx.extraction_cache.get_mut(device_key) {
        if devices.len() == 1 && max_len > 1 {
            let device = devices[0].clone();
            devices.resize(max_len, device);
            ctx.cardinality.insert(device_key.to_string(), max_len);
            debug!(
                mapping = %ctx.mapping.id,
                count = max_len,
                "Single device broadcast to all values"
            );
        }
    }
}

/// Pad every list shorter than `fan_out`.
pub fn pad(cache: &mut ExtractionCache, fan_out: usize) {
    for (path, values) in cache.iter_mut() {
        if values.len() >= fan_out {
            continue;
        }
        let filler = match values.as_slice() {
            [] => SubstituteValue::ignore(RepairStrategy::Default),
            [single] => single.clone(),
            [first, .., last] => {
                let strategy = last.repair_strategy;
                warn!(
                    path_target = %path,
                    len = values.len(),
                    fan_out,
                    strategy = ?strategy,
                    "Misaligned substitution values, applying repair strategy"
                );
                match strategy {
                    RepairStrategy::UseFirstValueOfArray => first.clone(),
                    RepairStrategy::UseLastValueOfArray => last.clone(),
                    other => SubstituteValue::ignore(other),
                }
            }
        };
        values.resize(fan_out, filler);
    }
}
