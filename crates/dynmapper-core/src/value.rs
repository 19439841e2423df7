//! Extracted substitution values.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::model::RepairStrategy;

/// Classification of an extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueType {
    Array,
    Number,
    Object,
    Textual,
    /// Nothing could be extracted.
    Ignore,
}

/// One extracted value for one target path and one fan-out index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstituteValue {
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub repair_strategy: RepairStrategy,
    pub expand_array: bool,
}

impl SubstituteValue {
    pub fn new(value: Value, value_type: ValueType, repair_strategy: RepairStrategy) -> Self {
        Self {
            value,
            value_type,
            repair_strategy,
            expand_array: false,
        }
    }

    /// Placeholder for a value that could not be extracted.
    pub fn ignore(repair_strategy: RepairStrategy) -> Self {
        Self::new(Value::Null, ValueType::Ignore, repair_strategy)
    }

    pub fn with_expand_array(mut self, expand: bool) -> Self {
        self.expand_array = expand;
        self
    }

    /// Classify a scalar or container value.
    ///
    /// JSON numbers are NUMBER, strings TEXTUAL (kept verbatim, so `"007"`
    /// and long serials survive), arrays ARRAY, everything else OBJECT.
    pub fn classify(value: Value, repair_strategy: RepairStrategy) -> Self {
        let value_type = match &value {
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::Textual,
            Value::Array(_) => ValueType::Array,
            _ => ValueType::Object,
        };
        Self::new(value, value_type, repair_strategy)
    }

    /// Classify one element of an expanded array: numeric-looking strings
    /// are NUMBER as well.
    pub fn classify_element(value: Value, repair_strategy: RepairStrategy) -> Self {
        match &value {
            Value::String(s) if is_numeric(s) => {
                Self::new(value, ValueType::Number, repair_strategy)
            }
            _ => Self::classify(value, repair_strategy),
        }
    }

    pub fn is_ignore(&self) -> bool {
        self.value_type == ValueType::Ignore
    }

    /// Missing or JSON null.
    pub fn is_missing_or_null(&self) -> bool {
        self.is_ignore() || self.value.is_null()
    }

    /// Value coerced to its declared type.
    ///
    /// NUMBER becomes a JSON number (`null` when not parseable), TEXTUAL a
    /// string; OBJECT and ARRAY are returned as a structural copy.
    pub fn typed_value(&self) -> Value {
        match self.value_type {
            ValueType::Number => to_number(&self.value),
            ValueType::Textual => match &self.value {
                Value::String(s) => Value::String(s.clone()),
                Value::Null => Value::Null,
                other => Value::String(other.to_string()),
            },
            ValueType::Ignore => Value::Null,
            ValueType::Array | ValueType::Object => self.value.clone(),
        }
    }
}

/// Whether a string parses as a number (decimal or `0x` hex).
pub fn is_numeric(s: &str) -> bool {
    parse_number(s).is_some()
}

fn parse_number(s: &str) -> Option<Number> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"));
    if let Some(digits) = hex {
        return u64::from_str_radix(digits, 16).ok().map(Number::from);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::from(i));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(n.clone()),
        Value::String(s) => parse_number(s).map(Value::Number).unwrap_or(Value::Null),
        Value::Bool(b) => Value::from(u8::from(*b)),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify() {
        let d = RepairStrategy::Default;
        assert_eq!(SubstituteValue::classify(json!(21.5), d).value_type, ValueType::Number);
        assert_eq!(SubstituteValue::classify(json!("42"), d).value_type, ValueType::Textual);
        assert_eq!(SubstituteValue::classify(json!("berlin"), d).value_type, ValueType::Textual);
        assert_eq!(SubstituteValue::classify(json!([1, 2]), d).value_type, ValueType::Array);
        assert_eq!(SubstituteValue::classify(json!({"a": 1}), d).value_type, ValueType::Object);
        assert_eq!(SubstituteValue::classify(json!(true), d).value_type, ValueType::Object);
        assert_eq!(SubstituteValue::classify(Value::Null, d).value_type, ValueType::Object);
    }

    #[test]
    fn test_classify_element() {
        let d = RepairStrategy::Default;
        assert_eq!(SubstituteValue::classify_element(json!("42"), d).value_type, ValueType::Number);
        assert_eq!(
            SubstituteValue::classify_element(json!("0x1F"), d).value_type,
            ValueType::Number
        );
        assert_eq!(
            SubstituteValue::classify_element(json!("berlin"), d).value_type,
            ValueType::Textual
        );
        assert_eq!(SubstituteValue::classify_element(Value::Null, d).value_type, ValueType::Object);
    }

    #[test]
    fn test_numeric_strings_kept_verbatim() {
        let d = RepairStrategy::Default;
        assert_eq!(SubstituteValue::classify(json!("007"), d).typed_value(), json!("007"));
        assert_eq!(
            SubstituteValue::classify(json!("12345678901234567890"), d).typed_value(),
            json!("12345678901234567890")
        );
    }

    #[test]
    fn test_typed_value() {
        let d = RepairStrategy::Default;
        assert_eq!(SubstituteValue::classify_element(json!("42"), d).typed_value(), json!(42));
        assert_eq!(
            SubstituteValue::classify_element(json!(" 1.5 "), d).typed_value(),
            json!(1.5)
        );
        assert_eq!(
            SubstituteValue::classify_element(json!("0xff"), d).typed_value(),
            json!(255)
        );
        assert_eq!(
            SubstituteValue::new(json!(17), ValueType::Textual, d).typed_value(),
            json!("17")
        );
        assert_eq!(
            SubstituteValue::new(json!("abc"), ValueType::Number, d).typed_value(),
            Value::Null
        );
        assert_eq!(SubstituteValue::ignore(d).typed_value(), Value::Null);
    }

    #[test]
    fn test_missing_or_null() {
        let d = RepairStrategy::Default;
        assert!(SubstituteValue::ignore(d).is_missing_or_null());
        assert!(SubstituteValue::classify(Value::Null, d).is_missing_or_null());
        assert!(!SubstituteValue::classify(json!(0), d).is_missing_or_null());
    }
}
