//! Derived Service publishing gate's mutual-TLS API port.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{Transformer, GATE, GATE_X509};
use crate::bundle::{object_ref, service_name, GeneratedManifestBundle};
use crate::config::{SpinnakerConfig, GATE_X509_PORT_PATH};
use crate::crd::{ExposeConfig, SpinnakerService};
use crate::{Error, Result};

/// Port name of the derived Service.
pub const X509_PORT_NAME: &str = "gate-x509";

/// mTLS API port declared in gate's profile, if any.
pub fn x509_port(config: &SpinnakerConfig) -> Result<Option<i32>> {
    match config.profile_i64(GATE, GATE_X509_PORT_PATH)? {
        Some(port) => i32::try_from(port)
            .map(Some)
            .map_err(|_| Error::invalid_manifest(GATE_X509, "default.apiPort out of range")),
        None => Ok(None),
    }
}

/// Public port of the derived Service: override for `gate-x509`, else the api port.
pub fn x509_public_port(expose: &ExposeConfig, api_port: i32) -> i32 {
    expose
        .service
        .overrides
        .get(GATE_X509)
        .and_then(|o| o.public_port)
        .unwrap_or(api_port)
}

/// Clone of the gate Service renamed and re-pointed at the mTLS port.
pub fn derive_x509_service(gate: &Service, expose: &ExposeConfig, api_port: i32) -> Service {
    let mut derived = gate.clone();
    derived.metadata.name = Some(service_name(GATE_X509));
    derived.metadata.resource_version = None;
    derived.metadata.uid = None;
    derived.status = None;

    let annotations = expose.annotations_for(GATE_X509);
    derived.metadata.annotations = if annotations.is_empty() {
        None
    } else {
        Some(annotations)
    };

    let spec = derived.spec.get_or_insert_with(Default::default);
    spec.type_ = Some(expose.service_type_for(GATE_X509));
    spec.cluster_ip = None;
    spec.cluster_ips = None;
    spec.ports = Some(vec![ServicePort {
        name: Some(X509_PORT_NAME.to_string()),
        port: x509_public_port(expose, api_port),
        target_port: Some(IntOrString::Int(api_port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }]);
    derived
}

pub struct X509Transformer;

#[async_trait]
impl Transformer for X509Transformer {
    fn name(&self) -> &'static str {
        "x509"
    }

    async fn transform_manifests(
        &self,
        svc: &SpinnakerService,
        bundle: &mut GeneratedManifestBundle,
    ) -> Result<()> {
        let expose = svc.expose();
        if !expose.is_set() {
            return Ok(());
        }
        match x509_port(&svc.spec.spinnaker_config)? {
            Some(api_port) => {
                let Some(gate) = bundle.get(GATE).and_then(|c| c.service.as_ref()) else {
                    debug!("no gate service generated, skipping x509 service");
                    return Ok(());
                };
                let derived = derive_x509_service(gate, expose, api_port);
                info!(api_port, "adding x509 gate service");
                bundle.entry(GATE_X509.to_string()).or_default().service = Some(derived);
            }
            None => {
                let namespace = svc
                    .namespace()
                    .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
                bundle
                    .entry(GATE_X509.to_string())
                    .or_default()
                    .to_delete
                    .push(object_ref("v1", "Service", &service_name(GATE_X509), &namespace));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::fixtures;
    use serde_json::json;

    fn spec(api_port: Option<i32>) -> serde_json::Value {
        let mut spec = json!({
            "expose": {
                "type": "service",
                "service": {
                    "type": "LoadBalancer",
                    "annotations": {"global": "yes"},
                    "overrides": {"gate-x509": {"annotations": {"tls": "passthrough"}, "publicPort": 443}}
                }
            }
        });
        if let Some(port) = api_port {
            spec["spinnakerConfig"] = json!({"profiles": {"gate": {"default": {"apiPort": port}}}});
        }
        spec
    }

    #[tokio::test]
    async fn synthesizes_derived_service_when_port_declared() {
        let svc = fixtures::spinnaker_service(spec(Some(8085)));
        let mut bundle = fixtures::bundle();
        X509Transformer.transform_manifests(&svc, &mut bundle).await.unwrap();

        let derived = bundle[GATE_X509].service.as_ref().unwrap();
        assert_eq!(derived.metadata.name.as_deref(), Some("spin-gate-x509"));
        let annotations = derived.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations["global"], "yes");
        assert_eq!(annotations["tls"], "passthrough");
        let spec = derived.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        let ports = spec.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some(X509_PORT_NAME));
        assert_eq!(ports[0].port, 443);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8085)));
        assert_eq!(spec.selector, bundle[GATE].service.as_ref().unwrap().spec.as_ref().unwrap().selector);
        assert!(bundle[GATE_X509].to_delete.is_empty());
    }

    #[tokio::test]
    async fn schedules_teardown_when_port_not_declared() {
        let svc = fixtures::spinnaker_service(spec(None));
        let mut bundle = fixtures::bundle();
        X509Transformer.transform_manifests(&svc, &mut bundle).await.unwrap();

        let entry = &bundle[GATE_X509];
        assert!(entry.service.is_none() && entry.deployment.is_none());
        assert_eq!(entry.to_delete.len(), 1);
        assert_eq!(entry.to_delete[0].metadata.name.as_deref(), Some("spin-gate-x509"));
    }

    #[tokio::test]
    async fn does_nothing_without_exposure() {
        let svc = fixtures::spinnaker_service(
            json!({"spinnakerConfig": {"profiles": {"gate": {"default": {"apiPort": 8085}}}}}),
        );
        let mut bundle = fixtures::bundle();
        X509Transformer.transform_manifests(&svc, &mut bundle).await.unwrap();
        assert!(!bundle.contains_key(GATE_X509));
    }
}
