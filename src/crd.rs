use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SpinnakerConfig;

pub const EXPOSE_TYPE_SERVICE: &str = "service";
pub const DEFAULT_EXPOSED_SERVICE_TYPE: &str = "LoadBalancer";
pub const CLUSTER_IP: &str = "ClusterIP";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "spinnaker.io",
    version = "v1alpha2",
    kind = "SpinnakerService",
    namespaced,
    status = "SpinnakerServiceStatus",
    shortname = "spinsvc",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"API","type":"string","jsonPath":".status.apiUrl"}"#,
    printcolumn = r#"{"name":"UI","type":"string","jsonPath":".status.uiUrl"}"#
)]
pub struct SpinnakerServiceSpec {
    #[serde(default)]
    pub spinnaker_config: SpinnakerConfig,
    #[serde(default)]
    pub expose: ExposeConfig,
    pub validation: Option<ValidationSetting>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kustomize: BTreeMap<String, ServiceKustomization>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeConfig {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub service: ExposeServiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeServiceConfig {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub public_port: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, ExposeServiceOverride>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeServiceOverride {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub public_port: Option<i32>,
}

impl ExposeConfig {
    pub fn is_set(&self) -> bool {
        !self.type_.is_empty()
    }

    pub fn is_service(&self) -> bool {
        self.type_.eq_ignore_ascii_case(EXPOSE_TYPE_SERVICE)
    }

    /// Kubernetes Service type for `component`; a per-component override wins
    /// over the global setting.
    pub fn service_type_for(&self, component: &str) -> String {
        self.service
            .overrides
            .get(component)
            .and_then(|o| o.type_.clone())
            .or_else(|| self.service.type_.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPOSED_SERVICE_TYPE.to_string())
    }

    /// Global annotations overlaid key-by-key with the component's own.
    pub fn annotations_for(&self, component: &str) -> BTreeMap<String, String> {
        let mut annotations = self.service.annotations.clone();
        if let Some(o) = self.service.overrides.get(component) {
            annotations.extend(o.annotations.clone());
        }
        annotations
    }

    pub fn public_port_for(&self, component: &str) -> Option<i32> {
        self.service
            .overrides
            .get(component)
            .and_then(|o| o.public_port)
            .or(self.service.public_port)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSetting {
    #[serde(default)]
    pub fail_on_error: bool,
    pub frequency_seconds: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceKustomization {
    pub service: Option<Kustomization>,
    pub deployment: Option<Kustomization>,
}

/// Structured overlays for one generated object. Each entry is YAML or JSON text.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<String>,
    #[serde(rename = "patchesJson6902")]
    pub patches_json6902: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches_strategic_merge: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum Health {
    #[serde(rename = "OK")]
    Ok,
    Updating,
    Failure,
    #[default]
    #[serde(rename = "N/A")]
    Na,
}

impl Health {
    fn severity(self) -> u8 {
        match self {
            Health::Na => 0,
            Health::Ok => 1,
            Health::Updating => 2,
            Health::Failure => 3,
        }
    }

    /// The worse of two verdicts.
    pub fn worst(self, other: Health) -> Health {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Health::Ok => "OK",
            Health::Updating => "Updating",
            Health::Failure => "Failure",
            Health::Na => "N/A",
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HashStatus {
    pub hash: String,
    pub last_updated_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub name: String,
    pub image: Option<String>,
    pub replicas: i32,
    pub ready_replicas: i32,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpinnakerServiceStatus {
    #[serde(default)]
    pub status: Health,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ui_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_deployed: BTreeMap<String, HashStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<DeploymentStatus>,
    #[serde(default)]
    pub service_count: i32,
    #[serde(default)]
    pub ready_service_count: i32,
}

impl SpinnakerService {
    pub fn expose(&self) -> &ExposeConfig {
        &self.spec.expose
    }

    pub fn status_or_default(&self) -> SpinnakerServiceStatus {
        self.status.clone().unwrap_or_default()
    }
}

/// Schema for a free-form object the API server must keep as-is.
pub fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        Value::Bool(true),
    );
    Schema::Object(schema)
}

/// Schema for a map whose values are free-form objects.
pub fn preserve_unknown_map(gen: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.object().additional_properties = Some(Box::new(preserve_unknown_fields(gen)));
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expose() -> ExposeConfig {
        ExposeConfig {
            type_: "service".into(),
            service: ExposeServiceConfig {
                type_: Some("LoadBalancer".into()),
                annotations: BTreeMap::from([
                    ("a".to_string(), "global".to_string()),
                    ("b".to_string(), "global".to_string()),
                ]),
                public_port: Some(80),
                overrides: BTreeMap::from([(
                    "gate".to_string(),
                    ExposeServiceOverride {
                        type_: Some("NodePort".into()),
                        annotations: BTreeMap::from([("b".to_string(), "gate".to_string())]),
                        public_port: None,
                    },
                )]),
            },
        }
    }

    #[test]
    fn override_takes_precedence_key_by_key() {
        let e = expose();
        let gate = e.annotations_for("gate");
        assert_eq!(gate["a"], "global");
        assert_eq!(gate["b"], "gate");
        assert_eq!(e.annotations_for("deck")["b"], "global");
    }

    #[test]
    fn service_type_and_port_resolution() {
        let e = expose();
        assert_eq!(e.service_type_for("gate"), "NodePort");
        assert_eq!(e.service_type_for("deck"), "LoadBalancer");
        assert_eq!(e.public_port_for("gate"), Some(80));
        assert_eq!(ExposeConfig::default().service_type_for("deck"), "LoadBalancer");
    }

    #[test]
    fn worst_health_wins() {
        assert_eq!(Health::Ok.worst(Health::Updating), Health::Updating);
        assert_eq!(Health::Failure.worst(Health::Updating), Health::Failure);
        assert_eq!(Health::Na.worst(Health::Ok), Health::Ok);
    }

    #[test]
    fn crd_keeps_free_form_config() {
        use kube::CustomResourceExt;
        let crd = serde_json::to_value(SpinnakerService::crd()).unwrap();
        assert_eq!(crd["spec"]["names"]["shortNames"][0], "spinsvc");
        let schema = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"];
        let config = &schema["properties"]["spec"]["properties"]["spinnakerConfig"]["properties"];
        assert_eq!(config["config"]["x-kubernetes-preserve-unknown-fields"], true);
        assert_eq!(
            config["profiles"]["additionalProperties"]["x-kubernetes-preserve-unknown-fields"],
            true
        );
    }

    #[test]
    fn health_serializes_with_display_names() {
        assert_eq!(serde_json::to_value(Health::Na).unwrap(), "N/A");
        assert_eq!(serde_json::to_value(Health::Ok).unwrap(), "OK");
    }
}
