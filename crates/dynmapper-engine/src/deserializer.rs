//! Payload deserializers.
//!
//! Turns a raw inbound message into a JSON document according to the
//! mapping type:
//!
//! - `JSON`: parsed as-is
//! - `FLAT_FILE`: one delimited row, exposed as `{"message": <row>, "_FIELDS_": [..]}`
//! - `HEX`: hex text (or raw bytes), exposed as `{"message": "0x<hex>"}`
//!
//! No semantic interpretation happens here; `0x` strings become numbers
//! only as elements of an expanded array, or through an expression.

use regex::Regex;
use serde_json::{json, Value};
use tracing::trace;

use dynmapper_core::{DeserializationError, MapperConfig, MapperError, MappingType};

/// Key holding the raw message text for flat-file and hex payloads.
pub const TOKEN_MESSAGE: &str = "message";
/// Key holding the positional fields of a flat-file row.
pub const TOKEN_FIELDS: &str = "_FIELDS_";

/// Turns raw bytes into a JSON document.
pub trait PayloadDeserializer: Send + Sync {
    fn mapping_type(&self) -> MappingType;

    fn deserialize(&self, raw: &[u8]) -> Result<Value, DeserializationError>;
}

/// Pick the deserializer for a mapping type.
pub fn deserializer_for(
    mapping_type: MappingType,
    config: &MapperConfig,
) -> Result<Box<dyn PayloadDeserializer>, MapperError> {
    Ok(match mapping_type {
        MappingType::Json => Box::new(JsonDeserializer),
        MappingType::FlatFile => Box::new(FlatFileDeserializer::new(&config.flat_file_delimiter)?),
        MappingType::Hex => Box::new(HexDeserializer),
    })
}

/// JSON passthrough.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeserializer;

impl PayloadDeserializer for JsonDeserializer {
    fn mapping_type(&self) -> MappingType {
        MappingType::Json
    }

    fn deserialize(&self, raw: &[u8]) -> Result<Value, DeserializationError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(DeserializationError::Empty);
        }
        serde_json::from_slice(raw).map_err(|e| DeserializationError::InvalidJson(e.to_string()))
    }
}

/// Single delimited row (CSV-like).
///
/// Fields may be wrapped in double quotes to protect delimiters; a doubled
/// quote inside a quoted field stands for one quote character.
#[derive(Debug, Clone)]
pub struct FlatFileDeserializer {
    delimiter: Regex,
}

impl FlatFileDeserializer {
    pub fn new(delimiter: &str) -> Result<Self, MapperError> {
        let delimiter = Regex::new(delimiter).map_err(|e| {
            MapperError::Config(format!("invalid flat-file delimiter '{}': {}", delimiter, e))
        })?;
        Ok(Self { delimiter })
    }

    /// Split one row into fields.
    pub fn split_row(&self, row: &str) -> Result<Vec<String>, DeserializationError> {
        let quoted = quoted_mask(row)?;

        let mut fields = Vec::new();
        let mut start = 0;
        for m in self.delimiter.find_iter(row) {
            if m.start() < start || quoted[m.start()] || m.as_str().is_empty() {
                continue;
            }
            fields.push(unquote(&row[start..m.start()]));
            start = m.end();
        }
        fields.push(unquote(&row[start..]));
        Ok(fields)
    }
}

impl PayloadDeserializer for FlatFileDeserializer {
    fn mapping_type(&self) -> MappingType {
        MappingType::FlatFile
    }

    fn deserialize(&self, raw: &[u8]) -> Result<Value, DeserializationError> {
        let text = std::str::from_utf8(raw).map_err(|_| DeserializationError::InvalidUtf8)?;
        let row = text.trim_end_matches(['\r', '\n']);
        if row.trim().is_empty() {
            return Err(DeserializationError::Empty);
        }

        let quoted = quoted_mask(row)?;
        if row
            .char_indices()
            .any(|(i, c)| (c == '\n' || c == '\r') && !quoted[i])
        {
            return Err(DeserializationError::MalformedRow(
                "expected a single row, found a line break".to_string(),
            ));
        }

        let fields = self.split_row(row)?;
        trace!(fields = fields.len(), "Split flat-file row");
        Ok(json!({
            TOKEN_MESSAGE: row,
            TOKEN_FIELDS: fields,
        }))
    }
}

/// Hex-encoded binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexDeserializer;

impl PayloadDeserializer for HexDeserializer {
    fn mapping_type(&self) -> MappingType {
        MappingType::Hex
    }

    fn deserialize(&self, raw: &[u8]) -> Result<Value, DeserializationError> {
        if raw.is_empty() {
            return Err(DeserializationError::Empty);
        }

        let bytes = match std::str::from_utf8(raw) {
            Ok(text) => {
                // Remove optional "0x" prefix and whitespace
                let text = text.trim();
                let text = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(text);
                let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                if clean.is_empty() {
                    return Err(DeserializationError::Empty);
                }
                if clean.len() % 2 != 0 {
                    return Err(DeserializationError::InvalidHex(
                        "hex string must have even length".to_string(),
                    ));
                }
                hex::decode(&clean).map_err(|e| DeserializationError::InvalidHex(e.to_string()))?
            }
            // Not text: the payload already is the binary.
            Err(_) => raw.to_vec(),
        };

        trace!(bytes = bytes.len(), "Decoded hex payload");
        Ok(json!({ TOKEN_MESSAGE: format!("0x{}", hex::encode(&bytes)) }))
    }
}

/// Per-byte flag telling whether the position lies inside double quotes.
fn quoted_mask(row: &str) -> Result<Vec<bool>, DeserializationError> {
    let mut mask = vec![false; row.len() + 1];
    let mut inside = false;
    for (i, c) in row.char_indices() {
        if c == '"' {
            inside = !inside;
            // the quote character itself is treated as quoted
            for flag in mask.iter_mut().skip(i).take(c.len_utf8()) {
                *flag = true;
            }
            continue;
        }
        for flag in mask.iter_mut().skip(i).take(c.len_utf8()) {
            *flag = inside;
        }
    }
    if inside {
        return Err(DeserializationError::MalformedRow(format!(
            "unbalanced quotes in '{}'",
            row
        )));
    }
    Ok(mask)
}

fn unquote(field: &str) -> String {
    let trimmed = field.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_string()
    }
}
