//! Strategic merge patch for the workload objects we generate.
//!
//! Lists of maps that Kubernetes merges by key (containers by `name`, ports by
//! `containerPort`/`port`, mounts by `mountPath`, ...) are merged element by
//! element; every other list is replaced. Supported directives: `$patch:
//! replace` and `$patch: delete` on maps and list elements. Other `$`-prefixed
//! keys (`$retainKeys`, `$setElementOrder/...`) are dropped.

use serde_json::{Map, Value};
use thiserror::Error;

const PATCH_DIRECTIVE: &str = "$patch";

#[derive(Debug, Error, PartialEq)]
pub enum StrategicMergeError {
    #[error("patch document must be a map")]
    NotAMap,
    #[error("list element for {field} is missing merge key {key}")]
    MissingMergeKey { field: String, key: &'static str },
}

/// Apply `patch` to `original`, returning the merged document.
pub fn apply(original: &Value, patch: &Value) -> Result<Value, StrategicMergeError> {
    if !patch.is_object() {
        return Err(StrategicMergeError::NotAMap);
    }
    Ok(merge_value(Some(original), patch)?.unwrap_or(Value::Null))
}

fn merge_key(field: &str, items: &[&Value]) -> Option<&'static str> {
    match field {
        "containers" | "initContainers" | "ephemeralContainers" | "volumes" | "env"
        | "imagePullSecrets" => Some("name"),
        "volumeMounts" => Some("mountPath"),
        "volumeDevices" => Some("devicePath"),
        "hostAliases" => Some("ip"),
        "topologySpreadConstraints" => Some("topologyKey"),
        "ports" => {
            let container_ports = items.iter().any(|item| item.get("containerPort").is_some());
            Some(if container_ports { "containerPort" } else { "port" })
        }
        _ => None,
    }
}

fn directive(value: &Value) -> Option<&str> {
    value.get(PATCH_DIRECTIVE).and_then(Value::as_str)
}

/// `None` means the value is deleted.
fn merge_value(
    original: Option<&Value>,
    patch: &Value,
) -> Result<Option<Value>, StrategicMergeError> {
    let Value::Object(patch_map) = patch else {
        return Ok(Some(patch.clone()));
    };
    match directive(patch) {
        Some("delete") => return Ok(None),
        Some("replace") => return merge_map(&Map::new(), patch_map).map(|m| Some(Value::Object(m))),
        _ => {}
    }
    let empty = Map::new();
    let base = original.and_then(Value::as_object).unwrap_or(&empty);
    merge_map(base, patch_map).map(|m| Some(Value::Object(m)))
}

fn merge_map(
    original: &Map<String, Value>,
    patch: &Map<String, Value>,
) -> Result<Map<String, Value>, StrategicMergeError> {
    let mut merged = original.clone();
    for (key, value) in patch {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Value::Null => {
                merged.remove(key);
            }
            Value::Array(items) => {
                let list = merge_list(key, merged.get(key), items)?;
                merged.insert(key.clone(), Value::Array(list));
            }
            _ => match merge_value(merged.get(key), value)? {
                Some(v) => {
                    merged.insert(key.clone(), v);
                }
                None => {
                    merged.remove(key);
                }
            },
        }
    }
    Ok(merged)
}

fn merge_list(
    field: &str,
    original: Option<&Value>,
    patch: &[Value],
) -> Result<Vec<Value>, StrategicMergeError> {
    let replace = patch
        .iter()
        .any(|item| directive(item) == Some("replace") && item.as_object().map(Map::len) == Some(1));
    let original_items: Vec<&Value> = match original {
        Some(Value::Array(items)) if !replace => items.iter().collect(),
        _ => Vec::new(),
    };
    let patch_items: Vec<&Value> = patch
        .iter()
        .filter(|item| !(directive(item) == Some("replace") && item.as_object().map(Map::len) == Some(1)))
        .collect();

    let all_maps = patch_items.iter().all(|item| item.is_object());
    let probe: Vec<&Value> = patch_items.iter().chain(original_items.iter()).copied().collect();
    let key = match merge_key(field, &probe) {
        Some(key) if all_maps => key,
        _ => {
            return patch_items
                .into_iter()
                .map(|item| merge_value(None, item).map(|v| v.unwrap_or(Value::Null)))
                .collect();
        }
    };

    let mut merged: Vec<Value> = original_items.into_iter().cloned().collect();
    for item in patch_items {
        let id = item
            .get(key)
            .ok_or_else(|| StrategicMergeError::MissingMergeKey {
                field: field.to_string(),
                key,
            })?
            .clone();
        let position = merged.iter().position(|existing| existing.get(key) == Some(&id));
        match (position, merge_value(position.map(|i| &merged[i]), item)?) {
            (Some(i), Some(value)) => merged[i] = value,
            (Some(i), None) => {
                merged.remove(i);
            }
            (None, Some(value)) => merged.push(value),
            (None, None) => {}
        }
    }
    Ok(merged)
}
