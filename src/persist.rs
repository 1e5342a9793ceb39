//! Makes the cluster match the generated manifests.
//!
//! Each object is either created (absent) or patched with a three-way JSON
//! merge patch computed from a deletion baseline, the desired object and the
//! live object. The baseline is the desired object carrying the live labels
//! and annotations, so only those two maps can produce deletions; fields the
//! API server or other controllers set elsewhere are left alone.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::bundle::{GeneratedManifestBundle, ServiceConfig};
use crate::cluster::{build_api_resource, SharedClient};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectAction {
    Create(Value),
    Patch(Value),
    Unchanged,
}

#[derive(Clone, Copy, Default)]
struct DiffMode {
    ignore_deletions: bool,
    ignore_changes_and_additions: bool,
}

/// JSON merge patch turning `from` into `to`.
fn diff(from: &Map<String, Value>, to: &Map<String, Value>, mode: DiffMode) -> Map<String, Value> {
    let mut patch = Map::new();
    for (key, target) in to {
        match (from.get(key), target) {
            (None, _) => {
                if !mode.ignore_changes_and_additions {
                    patch.insert(key.clone(), target.clone());
                }
            }
            (Some(Value::Object(source)), Value::Object(target)) => {
                let nested = diff(source, target, mode);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            (Some(source), _) if source != target => {
                if !mode.ignore_changes_and_additions {
                    patch.insert(key.clone(), target.clone());
                }
            }
            _ => {}
        }
    }
    if !mode.ignore_deletions {
        for key in from.keys() {
            if !to.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }
    patch
}

/// Deep-merge `overlay` into `base`; overlay values win on conflicts.
fn merge_into(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Three-way JSON merge patch: additions and changes come from comparing the
/// live (`current`) object with the desired (`modified`) one, deletions only
/// from comparing `original` with `modified`.
pub fn three_way_merge_patch(original: &Value, modified: &Value, current: &Value) -> Result<Value> {
    let as_map = |value: &Value, which: &str| {
        value
            .as_object()
            .cloned()
            .ok_or_else(|| Error::invalid_manifest(which, "expected a JSON object"))
    };
    let original = as_map(original, "original")?;
    let modified = as_map(modified, "modified")?;
    let current = as_map(current, "current")?;

    let mut patch = diff(
        &original,
        &modified,
        DiffMode {
            ignore_changes_and_additions: true,
            ..Default::default()
        },
    );
    let delta = diff(
        &current,
        &modified,
        DiffMode {
            ignore_deletions: true,
            ..Default::default()
        },
    );
    merge_into(&mut patch, delta);
    Ok(Value::Object(patch))
}

/// The desired object with the live object's labels and annotations.
pub fn deletion_baseline(desired: &Value, live: &Value) -> Value {
    let mut baseline = desired.clone();
    if let Some(meta) = baseline.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in ["labels", "annotations"] {
            match live.pointer(&format!("/metadata/{field}")) {
                Some(value) if !value.is_null() => {
                    meta.insert(field.to_string(), value.clone());
                }
                _ => {
                    meta.remove(field);
                }
            }
        }
    }
    baseline
}

/// A patch whose `spec` section contains nothing but nulls is an artifact of
/// the diff and must not be sent.
fn is_degenerate(patch: &Value) -> bool {
    match patch.get("spec").and_then(Value::as_object) {
        Some(spec) => !spec.is_empty() && spec.values().all(Value::is_null),
        None => false,
    }
}

/// Decide how to bring `live` to `desired` without touching the cluster.
pub fn reconcile_object(desired: &Value, live: Option<&Value>) -> Result<ObjectAction> {
    let Some(live) = live else {
        return Ok(ObjectAction::Create(desired.clone()));
    };
    let baseline = deletion_baseline(desired, live);
    let patch = three_way_merge_patch(&baseline, desired, live)?;
    let empty = patch.as_object().map(Map::is_empty).unwrap_or(true);
    if empty || is_degenerate(&patch) {
        return Ok(ObjectAction::Unchanged);
    }
    Ok(ObjectAction::Patch(patch))
}

pub struct ManifestPersister {
    client: SharedClient,
}

impl ManifestPersister {
    pub fn new(client: SharedClient) -> Self {
        Self { client }
    }

    /// Persist every subcomponent of the bundle. The first failure aborts the
    /// pass; objects already written stay in place.
    pub async fn persist_bundle(
        &self,
        bundle: &GeneratedManifestBundle,
        namespace: &str,
    ) -> Result<()> {
        for (component, config) in bundle {
            self.persist_service_config(component, config, namespace)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, config))]
    async fn persist_service_config(
        &self,
        component: &str,
        config: &ServiceConfig,
        namespace: &str,
    ) -> Result<()> {
        let mut owner = None;
        if let Some(deployment) = &config.deployment {
            let applied = self
                .persist_object(serde_json::to_value(deployment)?, namespace)
                .await?;
            owner = deployment_owner_reference(&applied);
        }
        if let Some(service) = &config.service {
            self.persist_object(serde_json::to_value(service)?, namespace)
                .await?;
        }
        for resource in &config.resources {
            let mut value = serde_json::to_value(resource)?;
            if let (Some(owner), Some(meta)) = (&owner, value.get_mut("metadata")) {
                meta["ownerReferences"] = serde_json::to_value(vec![owner])?;
            }
            self.persist_object(value, namespace).await?;
        }
        for object in &config.to_delete {
            self.delete_object(object, namespace).await?;
        }
        Ok(())
    }

    /// Create or patch one object, returning the resulting live object.
    pub async fn persist_object(&self, mut desired: Value, namespace: &str) -> Result<DynamicObject> {
        let (api_version, kind, name) = identity(&desired)?;
        let declared = desired
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);
        let namespace = match declared {
            Some(ns) => ns,
            None => {
                desired["metadata"]["namespace"] = Value::String(namespace.to_string());
                namespace.to_string()
            }
        };
        let resource = build_api_resource(&api_version, &kind);

        let live = self.client.get_object(&resource, &namespace, &name).await?;
        let live_value = live.as_ref().map(serde_json::to_value).transpose()?;

        match reconcile_object(&desired, live_value.as_ref())? {
            ObjectAction::Create(object) => {
                info!(%kind, %name, %namespace, "creating object");
                let object: DynamicObject = serde_json::from_value(object)?;
                self.client
                    .create_object(&resource, &namespace, &object)
                    .await
            }
            ObjectAction::Patch(patch) => {
                info!(%kind, %name, %namespace, "patching object");
                debug!(%patch, "merge patch");
                self.client
                    .patch_object(&resource, &namespace, &name, &patch)
                    .await
            }
            ObjectAction::Unchanged => {
                debug!(%kind, %name, %namespace, "object up to date, skipping patch");
                live.ok_or_else(|| Error::invalid_manifest(name, "live object vanished"))
            }
        }
    }

    pub async fn delete_object(&self, object: &DynamicObject, namespace: &str) -> Result<()> {
        let value = serde_json::to_value(object)?;
        let (api_version, kind, name) = identity(&value)?;
        let namespace = object
            .metadata
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| namespace.to_string());
        info!(%kind, %name, %namespace, "deleting object");
        let resource = build_api_resource(&api_version, &kind);
        self.client
            .delete_object(&resource, &namespace, &name)
            .await
    }
}

fn identity(object: &Value) -> Result<(String, String, String)> {
    let field = |pointer: &str, key: &'static str| {
        object
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(Error::MissingObjectKey(key))
    };
    Ok((
        field("/apiVersion", ".apiVersion")?,
        field("/kind", ".kind")?,
        field("/metadata/name", ".metadata.name")?,
    ))
}

fn deployment_owner_reference(applied: &DynamicObject) -> Option<OwnerReference> {
    let name = applied.metadata.name.clone()?;
    let uid = applied.metadata.uid.clone()?;
    Some(OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        name,
        uid,
        ..Default::default()
    })
}
