//! Mapping definitions.
//!
//! A [`Mapping`] is produced by an external editor and consumed read-only by
//! the engine. Field names follow the JSON wire format (`targetAPI`,
//! `pathSource`, `resolve2ExternalId`, ...), unknown fields are ignored.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{MapperError, Result};
use crate::path::JsonPath;

/// Platform API a mapping produces objects for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetApi {
    Event,
    Alarm,
    Measurement,
    Inventory,
    Operation,
}

impl TargetApi {
    /// Target path that identifies the device for this API.
    ///
    /// INVENTORY objects are addressed by their root `id`.
    pub fn identifier_path(&self) -> &'static str {
        match self {
            TargetApi::Event | TargetApi::Alarm | TargetApi::Measurement => "source.id",
            TargetApi::Inventory => "id",
            TargetApi::Operation => "deviceId",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetApi::Event => "EVENT",
            TargetApi::Alarm => "ALARM",
            TargetApi::Measurement => "MEASUREMENT",
            TargetApi::Inventory => "INVENTORY",
            TargetApi::Operation => "OPERATION",
        }
    }
}

impl fmt::Display for TargetApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingType {
    #[default]
    Json,
    FlatFile,
    #[serde(alias = "GENERIC_BINARY")]
    Hex,
}

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

/// Policy for a substitution value that is missing or misaligned for a
/// fan-out index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairStrategy {
    /// Leave the template value untouched.
    #[default]
    Default,
    UseFirstValueOfArray,
    UseLastValueOfArray,
    /// Skip setting the path.
    Ignore,
    #[serde(alias = "REMOVE_IF_MISSING_OR_NULL")]
    RemoveIfMissing,
    RemoveIfNull,
    /// Create the path even if the template lacks it.
    CreateIfMissing,
}

impl RepairStrategy {
    pub fn removes_missing(&self) -> bool {
        matches!(self, Self::RemoveIfMissing | Self::RemoveIfNull)
    }
}

/// One source-path to target-path rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    pub path_source: String,
    pub path_target: String,
    #[serde(default)]
    pub repair_strategy: RepairStrategy,
    #[serde(default)]
    pub expand_array: bool,
    /// Marks the device-identifier substitution; its value is an external id.
    #[serde(default, rename = "resolve2ExternalId")]
    pub resolve_to_external_id: bool,
}

impl Substitution {
    pub fn new(path_source: impl Into<String>, path_target: impl Into<String>) -> Self {
        Self {
            path_source: path_source.into(),
            path_target: path_target.into(),
            repair_strategy: RepairStrategy::Default,
            expand_array: false,
            resolve_to_external_id: false,
        }
    }

    pub fn with_repair_strategy(mut self, strategy: RepairStrategy) -> Self {
        self.repair_strategy = strategy;
        self
    }

    pub fn with_expand_array(mut self, expand: bool) -> Self {
        self.expand_array = expand;
        self
    }

    pub fn with_resolve_to_external_id(mut self, resolve: bool) -> Self {
        self.resolve_to_external_id = resolve;
        self
    }
}

/// Declarative rule set converting one payload shape into platform objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_topic: Option<String>,
    #[serde(rename = "targetAPI")]
    pub target_api: TargetApi,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub mapping_type: MappingType,
    #[serde(default, deserialize_with = "template_string")]
    pub source_template: String,
    #[serde(deserialize_with = "template_string")]
    pub target_template: String,
    #[serde(default)]
    pub substitutions: Vec<Substitution>,
    #[serde(default)]
    pub external_id_type: String,
    #[serde(default)]
    pub create_non_existing_device: bool,
    #[serde(default)]
    pub update_existing_device: bool,
    /// Expression that must evaluate truthy for the message to be processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_mapping: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

impl Mapping {
    pub fn new(
        id: impl Into<String>,
        target_api: TargetApi,
        target_template: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            mapping_topic: None,
            target_api,
            direction: Direction::Inbound,
            mapping_type: MappingType::Json,
            source_template: "{}".to_string(),
            target_template: target_template.into(),
            substitutions: Vec::new(),
            external_id_type: String::new(),
            create_non_existing_device: false,
            update_existing_device: false,
            filter_mapping: None,
            debug: false,
        }
    }

    pub fn with_substitution(mut self, substitution: Substitution) -> Self {
        self.substitutions.push(substitution);
        self
    }

    pub fn with_mapping_type(mut self, mapping_type: MappingType) -> Self {
        self.mapping_type = mapping_type;
        self
    }

    pub fn with_external_id_type(mut self, external_id_type: impl Into<String>) -> Self {
        self.external_id_type = external_id_type.into();
        self
    }

    pub fn with_create_non_existing_device(mut self, create: bool) -> Self {
        self.create_non_existing_device = create;
        self
    }

    pub fn with_update_existing_device(mut self, update: bool) -> Self {
        self.update_existing_device = update;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_mapping = Some(filter.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Parse the target template.
    pub fn parsed_target_template(&self) -> Result<Value> {
        serde_json::from_str(&self.target_template)
            .map_err(|e| MapperError::InvalidTargetTemplate(e.to_string()))
    }

    /// The substitution whose value identifies the device.
    ///
    /// The first one flagged `resolve2ExternalId`, otherwise the first one
    /// targeting the API identifier path.
    pub fn device_identifier_substitution(&self) -> Option<&Substitution> {
        self.substitutions
            .iter()
            .find(|s| s.resolve_to_external_id)
            .or_else(|| {
                let id_path = self.target_api.identifier_path();
                self.substitutions.iter().find(|s| s.path_target == id_path)
            })
    }

    /// Target path used as fan-out key.
    pub fn device_key(&self) -> &str {
        self.device_identifier_substitution()
            .map(|s| s.path_target.as_str())
            .unwrap_or_else(|| self.target_api.identifier_path())
    }

    /// Check the definition before evaluation.
    pub fn validate(&self) -> Result<()> {
        self.parsed_target_template()?;

        if self.direction == Direction::Outbound {
            return Err(MapperError::InvalidMapping(format!(
                "mapping '{}' is OUTBOUND; only inbound mappings can be evaluated",
                self.id
            )));
        }

        for (i, sub) in self.substitutions.iter().enumerate() {
            if sub.path_source.trim().is_empty() {
                return Err(MapperError::InvalidMapping(format!(
                    "substitution #{} has an empty pathSource",
                    i
                )));
            }
            if sub.path_target.trim().is_empty() {
                return Err(MapperError::InvalidMapping(format!(
                    "substitution #{} has an empty pathTarget",
                    i
                )));
            }
            if let Err(e) = JsonPath::parse(&sub.path_target) {
                return Err(MapperError::InvalidMapping(format!(
                    "substitution #{} has an invalid pathTarget: {}",
                    i, e
                )));
            }
        }

        let flagged = self
            .substitutions
            .iter()
            .filter(|s| s.resolve_to_external_id)
            .count();
        if flagged > 1 {
            return Err(MapperError::InvalidMapping(format!(
                "{} substitutions are marked resolve2ExternalId, at most one is allowed",
                flagged
            )));
        }
        if flagged == 1 && self.external_id_type.trim().is_empty() {
            return Err(MapperError::InvalidMapping(
                "resolve2ExternalId requires externalIdType".to_string(),
            ));
        }
        Ok(())
    }
}

/// Templates travel as JSON text; accept an inline JSON value as well.
fn template_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}
