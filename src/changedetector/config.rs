use async_trait::async_trait;
use kube::ResourceExt;
use sha2::{Digest, Sha256};

use super::ChangeDetector;
use crate::crd::SpinnakerService;
use crate::Result;

/// Key of the configuration record in `status.lastDeployed`.
pub const CONFIG_KEY: &str = "config";

/// Identity of the configuration source: the resource's name, namespace and
/// the content of its spec.
pub fn config_fingerprint(svc: &SpinnakerService) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(svc.namespace().unwrap_or_default().as_bytes());
    hasher.update(b"/");
    hasher.update(svc.name_any().as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(&svc.spec)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Reports drift when the resource differs from the one last deployed.
pub struct ConfigChangeDetector;

#[async_trait]
impl ChangeDetector for ConfigChangeDetector {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn is_up_to_date(&self, svc: &SpinnakerService) -> Result<bool> {
        let Some(recorded) = svc
            .status
            .as_ref()
            .and_then(|s| s.last_deployed.get(CONFIG_KEY))
        else {
            return Ok(false);
        };
        Ok(recorded.hash == config_fingerprint(svc)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HashStatus, SpinnakerServiceStatus};
    use crate::transformer::fixtures;
    use serde_json::json;

    fn deployed(svc: &mut SpinnakerService) {
        let hash = config_fingerprint(svc).unwrap();
        svc.status = Some(SpinnakerServiceStatus {
            last_deployed: [(CONFIG_KEY.to_string(), HashStatus { hash, last_updated_at: None })].into(),
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn never_deployed_is_out_of_date() {
        let svc = fixtures::spinnaker_service(json!({}));
        assert!(!ConfigChangeDetector.is_up_to_date(&svc).await.unwrap());
    }

    #[tokio::test]
    async fn unchanged_spec_is_up_to_date() {
        let mut svc = fixtures::spinnaker_service(json!({"spinnakerConfig": {"config": {"version": "1.28.0"}}}));
        deployed(&mut svc);
        assert!(ConfigChangeDetector.is_up_to_date(&svc).await.unwrap());
    }

    #[tokio::test]
    async fn edited_spec_or_identity_is_out_of_date() {
        let mut svc = fixtures::spinnaker_service(json!({"spinnakerConfig": {"config": {"version": "1.28.0"}}}));
        deployed(&mut svc);
        let mut edited = svc.clone();
        edited
            .spec
            .spinnaker_config
            .set_hal_config_prop("version", json!("1.29.0"))
            .unwrap();
        assert!(!ConfigChangeDetector.is_up_to_date(&edited).await.unwrap());

        let mut moved = svc.clone();
        moved.metadata.namespace = Some("elsewhere".into());
        assert!(!ConfigChangeDetector.is_up_to_date(&moved).await.unwrap());
    }
}
