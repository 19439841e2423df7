//! Dot/bracket paths into JSON documents.
//!
//! Supports:
//! - Nested objects: `c8y_TemperatureMeasurement.T.value`
//! - Array indices: `readings[0]`, `matrix[1][2]`
//! - Quoted keys: `fragments['c8y.Position'].lat`
//! - Root notation: `$` (and an optional leading `$.`)

use serde_json::{Map, Value};
use std::fmt;

use crate::error::PathError;

/// Largest array index a path may address. Setting an index pads the array
/// with nulls, so this bounds the allocation one write can cause.
pub const MAX_INDEX: usize = 10_000;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{}", k),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// A parsed target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse a dot/bracket path.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let body = if trimmed == "$" {
            ""
        } else if let Some(rest) = trimmed.strip_prefix("$.") {
            rest
        } else {
            trimmed
        };

        let mut segments = Vec::new();
        let chars: Vec<char> = body.chars().collect();
        let mut i = 0;
        let mut key = String::new();

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    i += 1;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| PathError::UnbalancedBracket(path.to_string()))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let inner = inner.trim();
                    let quoted = (inner.starts_with('\'') && inner.ends_with('\''))
                        || (inner.starts_with('"') && inner.ends_with('"'));
                    if quoted && inner.len() >= 2 {
                        segments.push(Segment::Key(inner[1..inner.len() - 1].to_string()));
                    } else {
                        let index = inner
                            .parse::<usize>()
                            .ok()
                            .filter(|i| *i <= MAX_INDEX)
                            .ok_or_else(|| PathError::InvalidIndex(inner.to_string()))?;
                        segments.push(Segment::Index(index));
                    }
                    i = close + 1;
                }
                ']' => return Err(PathError::UnbalancedBracket(path.to_string())),
                c => {
                    key.push(c);
                    i += 1;
                }
            }
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// Original path text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the path addresses the document root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Read the value at this path.
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(map)) => map.get(k)?,
                (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether a value (possibly `null`) exists at this path.
    pub fn contains(&self, doc: &Value) -> bool {
        self.get(doc).is_some()
    }

    /// Write `value` at this path, creating intermediate objects and arrays.
    ///
    /// A `null` encountered on the way is replaced by the container the next
    /// segment needs; any other scalar is an error.
    pub fn set(&self, doc: &mut Value, value: Value) -> Result<(), PathError> {
        let Some((last, parents)) = self.segments.split_last() else {
            *doc = value;
            return Ok(());
        };

        let mut current = doc;
        for (pos, segment) in parents.iter().enumerate() {
            let next = &self.segments[pos + 1];
            current = self.step_mut(current, segment, next)?;
        }

        match last {
            Segment::Key(k) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => {
                        map.insert(k.clone(), value);
                        Ok(())
                    }
                    _ => Err(self.not_a_container(last)),
                }
            }
            Segment::Index(i) => {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(arr) => {
                        if arr.len() <= *i {
                            arr.resize(*i + 1, Value::Null);
                        }
                        arr[*i] = value;
                        Ok(())
                    }
                    _ => Err(self.not_a_container(last)),
                }
            }
        }
    }

    /// Delete the value at this path; returns what was removed.
    ///
    /// Array elements are removed, shifting the tail.
    pub fn remove(&self, doc: &mut Value) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = doc;
        for segment in parents {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(map)) => map.get_mut(k)?,
                (Segment::Index(i), Value::Array(arr)) => arr.get_mut(*i)?,
                _ => return None,
            };
        }
        match (last, current) {
            (Segment::Key(k), Value::Object(map)) => map.shift_remove(k),
            (Segment::Index(i), Value::Array(arr)) if *i < arr.len() => Some(arr.remove(*i)),
            _ => None,
        }
    }

    fn step_mut<'a>(
        &self,
        current: &'a mut Value,
        segment: &Segment,
        next: &Segment,
    ) -> Result<&'a mut Value, PathError> {
        let empty_child = || match next {
            Segment::Key(_) => Value::Object(Map::new()),
            Segment::Index(_) => Value::Array(Vec::new()),
        };

        match segment {
            Segment::Key(k) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => {
                        let child = map.entry(k.clone()).or_insert_with(empty_child);
                        if child.is_null() {
                            *child = empty_child();
                        }
                        Ok(child)
                    }
                    _ => Err(self.not_a_container(segment)),
                }
            }
            Segment::Index(i) => {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(arr) => {
                        if arr.len() <= *i {
                            arr.resize(*i + 1, Value::Null);
                        }
                        let child = &mut arr[*i];
                        if child.is_null() {
                            *child = empty_child();
                        }
                        Ok(child)
                    }
                    _ => Err(self.not_a_container(segment)),
                }
            }
        }
    }

    fn not_a_container(&self, segment: &Segment) -> PathError {
        PathError::NotAContainer {
            path: self.raw.clone(),
            segment: segment.to_string(),
        }
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
