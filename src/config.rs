//! Typed dotted-path access into the semi-structured Spinnaker configuration.
//!
//! The halconfig and the per-service profiles are free-form documents. Paths
//! look like `security.apiSecurity.overrideBaseUrl`; a segment that parses as
//! an unsigned integer indexes into a list (`providers.kubernetes.accounts.0.name`).

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const LOCATION_PATH: &str = "deploymentEnvironment.location";
pub const VERSION_PATH: &str = "version";
pub const GATE_OVERRIDE_URL_PATH: &str = "security.apiSecurity.overrideBaseUrl";
pub const DECK_OVERRIDE_URL_PATH: &str = "security.uiSecurity.overrideBaseUrl";
pub const GATE_SSL_ENABLED_PATH: &str = "security.apiSecurity.ssl.enabled";
pub const DECK_SSL_ENABLED_PATH: &str = "security.uiSecurity.ssl.enabled";
pub const SERVER_PORT_PATH: &str = "server.port";
pub const GATE_X509_PORT_PATH: &str = "default.apiPort";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("key not found: {path}")]
    KeyNotFound { path: String },

    #[error("index {index} out of range at {path} (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Configuration of one Spinnaker installation as carried by the custom resource.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpinnakerConfig {
    /// Main halconfig document.
    #[serde(default = "empty_object")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub config: Value,

    /// Per-service profile overlays, keyed by subcomponent.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_map")]
    pub profiles: BTreeMap<String, Value>,

    /// Per-service deployment settings, keyed by subcomponent.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_map")]
    pub service_settings: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl SpinnakerConfig {
    pub fn set_hal_config_prop(&mut self, path: &str, value: Value) -> Result<(), ConfigError> {
        set(&mut self.config, path, value)
    }

    pub fn hal_string(&self, path: &str) -> Result<Option<String>, ConfigError> {
        opt_string(&self.config, path)
    }

    pub fn hal_bool(&self, path: &str) -> Result<Option<bool>, ConfigError> {
        opt_bool(&self.config, path)
    }

    pub fn profile_i64(&self, service: &str, path: &str) -> Result<Option<i64>, ConfigError> {
        match self.profiles.get(service) {
            Some(profile) => opt_i64(profile, path),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub fn set_profile_prop(
        &mut self,
        service: &str,
        path: &str,
        value: Value,
    ) -> Result<(), ConfigError> {
        let profile = self
            .profiles
            .entry(service.to_string())
            .or_insert_with(empty_object);
        set(profile, path, value)
    }

    /// Spinnaker version being deployed, empty when not configured.
    pub fn version(&self) -> Result<String, ConfigError> {
        Ok(self.hal_string(VERSION_PATH)?.unwrap_or_default())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

fn parse_index(path: &str, segment: &str) -> Result<usize, ConfigError> {
    segment.parse().map_err(|_| ConfigError::TypeMismatch {
        path: path.to_string(),
        expected: "map",
        found: "list",
    })
}

/// Walk `path` from `root`. Every segment must exist.
pub fn get<'a>(root: &'a Value, path: &str) -> Result<&'a Value, ConfigError> {
    let mut current = root;
    let mut walked = String::new();
    for segment in path.split('.') {
        walked = join(&walked, segment);
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| ConfigError::KeyNotFound {
                path: walked.clone(),
            })?,
            Value::Array(items) => {
                let index = parse_index(&walked, segment)?;
                items.get(index).ok_or(ConfigError::IndexOutOfRange {
                    path: walked.clone(),
                    index,
                    len: items.len(),
                })?
            }
            Value::Null => {
                return Err(ConfigError::KeyNotFound { path: walked });
            }
            other => {
                return Err(ConfigError::TypeMismatch {
                    path: walked,
                    expected: "map or list",
                    found: kind_of(other),
                })
            }
        };
    }
    Ok(current)
}

/// Like [`get`], but a missing key or an explicit null yields `None`.
/// Index and type errors are still reported.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>, ConfigError> {
    match get(root, path) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::KeyNotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn opt_string(root: &Value, path: &str) -> Result<Option<String>, ConfigError> {
    match lookup(root, path)? {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(ConfigError::TypeMismatch {
            path: path.to_string(),
            expected: "string",
            found: kind_of(other),
        }),
    }
}

pub fn opt_bool(root: &Value, path: &str) -> Result<Option<bool>, ConfigError> {
    match lookup(root, path)? {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(other) => Err(ConfigError::TypeMismatch {
            path: path.to_string(),
            expected: "bool",
            found: kind_of(other),
        }),
    }
}

pub fn opt_i64(root: &Value, path: &str) -> Result<Option<i64>, ConfigError> {
    let mismatch = |found| ConfigError::TypeMismatch {
        path: path.to_string(),
        expected: "integer",
        found,
    };
    match lookup(root, path)? {
        None => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| mismatch("number")),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| mismatch("string")),
        Some(other) => Err(mismatch(kind_of(other))),
    }
}

/// Set `value` at `path`, creating intermediate maps as needed.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), ConfigError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    let mut walked = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        walked = join(&walked, segment);
        if current.is_null() {
            *current = empty_object();
        }
        current = match current {
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_string(), value);
                    return Ok(());
                }
                map.entry(segment.to_string()).or_insert_with(empty_object)
            }
            Value::Array(items) => {
                let index = parse_index(&walked, segment)?;
                let len = items.len();
                let slot = items.get_mut(index).ok_or(ConfigError::IndexOutOfRange {
                    path: walked.clone(),
                    index,
                    len,
                })?;
                if last {
                    *slot = value;
                    return Ok(());
                }
                slot
            }
            other => {
                return Err(ConfigError::TypeMismatch {
                    path: walked,
                    expected: "map or list",
                    found: kind_of(other),
                })
            }
        };
    }
    Ok(())
}
