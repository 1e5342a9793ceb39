use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DynamicObject, TypeMeta};
use kube::core::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Objects generated for one subcomponent.
///
/// An entry may carry only `to_delete`, e.g. to tear down a Service that a
/// transformer created on an earlier pass.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    #[serde(default)]
    pub resources: Vec<DynamicObject>,
    #[serde(default)]
    pub to_delete: Vec<DynamicObject>,
}

/// Generated manifests keyed by subcomponent name ("gate", "deck", ...).
pub type GeneratedManifestBundle = BTreeMap<String, ServiceConfig>;

/// Reference used in deletion lists: only type and identity are meaningful.
pub fn object_ref(api_version: &str, kind: &str, name: &str, namespace: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: serde_json::Value::Object(Default::default()),
    }
}

/// Generated object name for a subcomponent, e.g. `spin-gate`.
pub fn service_name(component: &str) -> String {
    format!("spin-{component}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_generator_output() {
        let bundle: GeneratedManifestBundle = serde_json::from_value(json!({
            "gate": {
                "deployment": {
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": {"name": "spin-gate"},
                    "spec": {
                        "selector": {"matchLabels": {"app": "gate"}},
                        "template": {"spec": {"containers": [{"name": "gate"}]}}
                    }
                },
                "resources": [{
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "spin-gate-files"}
                }]
            },
            "gate-x509": {
                "toDelete": [{"apiVersion": "v1", "kind": "Service", "metadata": {"name": "spin-gate-x509"}}]
            }
        }))
        .unwrap();

        assert!(bundle["gate"].deployment.is_some());
        assert_eq!(bundle["gate"].resources.len(), 1);
        assert!(bundle["gate-x509"].deployment.is_none());
        assert_eq!(bundle["gate-x509"].to_delete.len(), 1);
    }
}
