use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::Value;

use super::Transformer;
use crate::config::LOCATION_PATH;
use crate::crd::SpinnakerService;
use crate::{Error, Result};

/// Deploys Spinnaker into the namespace of the SpinnakerService.
pub struct TargetTransformer;

#[async_trait]
impl Transformer for TargetTransformer {
    fn name(&self) -> &'static str {
        "target"
    }

    async fn transform_config(&self, svc: &mut SpinnakerService) -> Result<()> {
        let namespace = svc
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        svc.spec
            .spinnaker_config
            .set_hal_config_prop(LOCATION_PATH, Value::String(namespace))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::fixtures;
    use serde_json::json;

    #[tokio::test]
    async fn writes_namespace_as_location() {
        let mut svc = fixtures::spinnaker_service(json!({
            "spinnakerConfig": {"config": {"deploymentEnvironment": {"location": "other"}}}
        }));
        TargetTransformer.transform_config(&mut svc).await.unwrap();
        assert_eq!(
            svc.spec.spinnaker_config.hal_string(LOCATION_PATH).unwrap(),
            Some("spinnaker".into())
        );
    }

    #[tokio::test]
    async fn scalar_in_the_way_is_a_type_mismatch() {
        let mut svc = fixtures::spinnaker_service(json!({
            "spinnakerConfig": {"config": {"deploymentEnvironment": "legacy"}}
        }));
        let err = TargetTransformer.transform_config(&mut svc).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
