use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

use super::Transformer;
use crate::bundle::GeneratedManifestBundle;
use crate::crd::SpinnakerService;
use crate::{Error, Result};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const MANAGED_BY: &str = "spinnaker-operator";

/// Makes the SpinnakerService the controller owner of every Deployment and
/// Service in the bundle, and labels them for discovery.
pub struct OwnerTransformer;

pub fn owner_reference(svc: &SpinnakerService) -> Result<OwnerReference> {
    let name = svc
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let uid = svc
        .meta()
        .uid
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
    Ok(OwnerReference {
        api_version: SpinnakerService::api_version(&()).to_string(),
        kind: SpinnakerService::kind(&()).to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

fn stamp(meta: &mut ObjectMeta, owner: &OwnerReference, component: &str) {
    let owners = meta.owner_references.get_or_insert_with(Vec::new);
    owners.retain(|o| o.uid != owner.uid && o.controller != Some(true));
    owners.push(owner.clone());

    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
        .entry(NAME_LABEL.to_string())
        .or_insert_with(|| component.to_string());
}

#[async_trait]
impl Transformer for OwnerTransformer {
    fn name(&self) -> &'static str {
        "owner"
    }

    async fn transform_manifests(
        &self,
        svc: &SpinnakerService,
        bundle: &mut GeneratedManifestBundle,
    ) -> Result<()> {
        let owner = owner_reference(svc)?;
        for (component, config) in bundle.iter_mut() {
            if let Some(deployment) = config.deployment.as_mut() {
                stamp(&mut deployment.metadata, &owner, component);
            }
            if let Some(service) = config.service.as_mut() {
                stamp(&mut service.metadata, &owner, component);
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

    #[tokio::test]
    async fn stamps_controller_reference_and_labels() {
        let svc = fixtures::spinnaker_service(json!({}));
        let mut bundle = fixtures::bundle();
        OwnerTransformer
            .transform_manifests(&svc, &mut bundle)
            .await
            .unwrap();

        let gate = bundle["gate"].deployment.as_ref().unwrap();
        let owners = gate.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "SpinnakerService");
        assert_eq!(owners[0].api_version, "spinnaker.io/v1alpha2");
        assert_eq!(owners[0].controller, Some(true));

        let labels = bundle["deck"].service.as_ref().unwrap().metadata.labels.clone().unwrap();
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGED_BY);
        assert_eq!(labels[NAME_LABEL], "deck");
    }

    #[tokio::test]
    async fn stamping_twice_keeps_a_single_reference() {
        let svc = fixtures::spinnaker_service(json!({}));
        let mut bundle = fixtures::bundle();
        for _ in 0..2 {
            OwnerTransformer
                .transform_manifests(&svc, &mut bundle)
                .await
                .unwrap();
        }
        let owners = bundle["gate"].service.as_ref().unwrap().metadata.owner_references.clone();
        assert_eq!(owners.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_uid_is_an_error() {
        let mut svc = fixtures::spinnaker_service(json!({}));
        svc.metadata.uid = None;
        let mut bundle = fixtures::bundle();
        assert!(OwnerTransformer
            .transform_manifests(&svc, &mut bundle)
            .await
            .is_err());
    }
}
