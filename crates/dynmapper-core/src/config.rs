//! Engine configuration.
//!
//! Values are resolved in three layers: built-in defaults, an optional TOML
//! file, then environment overrides.
//!
//! ```toml
//! flat_file_delimiter = ";\\s*"
//! send_payload = false
//! log_payload = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MapperError, Result};

/// Default values.
pub mod defaults {
    /// Separator between flat-file columns (regular expression).
    pub const FLAT_FILE_DELIMITER: &str = r",\s*";
    pub const SEND_PAYLOAD: bool = false;
    pub const LOG_PAYLOAD: bool = false;
    /// Fragment marking devices created while testing mappings.
    pub const TEST_DEVICE_TYPE: &str = "d11r_testDevice";
    /// Target path receiving the synthesized timestamp.
    pub const TIME_PATH: &str = "time";
}

/// Environment variable names.
pub mod env_vars {
    pub const FLAT_FILE_DELIMITER: &str = "DYNMAPPER_FLAT_FILE_DELIMITER";
    pub const SEND_PAYLOAD: &str = "DYNMAPPER_SEND_PAYLOAD";
    pub const LOG_PAYLOAD: &str = "DYNMAPPER_LOG_PAYLOAD";
    pub const TEST_DEVICE_TYPE: &str = "DYNMAPPER_TEST_DEVICE_TYPE";
    pub const LOG_JSON: &str = "DYNMAPPER_LOG_JSON";
}

/// Settings shared by every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub flat_file_delimiter: String,
    /// Dispatch composed objects; when false every evaluation is a dry run.
    pub send_payload: bool,
    /// Log each composed payload at info level.
    pub log_payload: bool,
    pub test_device_type: String,
    pub time_path: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            flat_file_delimiter: defaults::FLAT_FILE_DELIMITER.to_string(),
            send_payload: defaults::SEND_PAYLOAD,
            log_payload: defaults::LOG_PAYLOAD,
            test_device_type: defaults::TEST_DEVICE_TYPE.to_string(),
            time_path: defaults::TIME_PATH.to_string(),
        }
    }
}

impl MapperConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MapperError::Config(e.to_string()))
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MapperError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Defaults, then the optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        tracing::debug!(
            category = "config",
            send_payload = config.send_payload,
            log_payload = config.log_payload,
            delimiter = %config.flat_file_delimiter,
            "Loaded mapper configuration"
        );
        Ok(config)
    }

    /// Override fields from `DYNMAPPER_*` variables that are set and parse.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(env_vars::FLAT_FILE_DELIMITER) {
            if !v.is_empty() {
                self.flat_file_delimiter = v;
            }
        }
        if let Some(v) = env_bool(env_vars::SEND_PAYLOAD) {
            self.send_payload = v;
        }
        if let Some(v) = env_bool(env_vars::LOG_PAYLOAD) {
            self.log_payload = v;
        }
        if let Ok(v) = std::env::var(env_vars::TEST_DEVICE_TYPE) {
            if !v.is_empty() {
                self.test_device_type = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        regex::Regex::new(&self.flat_file_delimiter).map_err(|e| {
            MapperError::Config(format!(
                "invalid flat_file_delimiter '{}': {}",
                self.flat_file_delimiter, e
            ))
        })?;
        if self.time_path.trim().is_empty() {
            return Err(MapperError::Config("time_path must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_send_payload(mut self, send: bool) -> Self {
        self.send_payload = send;
        self
    }

    pub fn with_log_payload(mut self, log: bool) -> Self {
        self.log_payload = log;
        self
    }

    pub fn with_flat_file_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.flat_file_delimiter = delimiter.into();
        self
    }
}

/// Parse a boolean environment variable (`true/1/yes/on`, `false/0/no/off`).
pub fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
