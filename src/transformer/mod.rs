//! Ordered mutation steps applied to the configuration and the generated manifests.
//!
//! `transform_config` runs in registration order so later steps see the
//! properties set by earlier ones. `transform_manifests` runs in reverse, which
//! makes the first registered step (ownership stamping) see every object the
//! others add during the manifest phase.

use async_trait::async_trait;
use tracing::debug;

use crate::bundle::GeneratedManifestBundle;
use crate::cluster::SharedClient;
use crate::crd::{SpinnakerService, SpinnakerServiceStatus};
use crate::Result;

pub mod expose;
pub mod expose_ingress;
pub mod owner;
pub mod patches;
pub mod server_port;
pub mod target;
pub mod x509;

pub use expose::ExposeTransformer;
pub use expose_ingress::ExposeIngressTransformer;
pub use owner::OwnerTransformer;
pub use patches::PatchesTransformer;
pub use server_port::ServerPortTransformer;
pub use target::TargetTransformer;
pub use x509::X509Transformer;

pub const GATE: &str = "gate";
pub const DECK: &str = "deck";
pub const GATE_X509: &str = "gate-x509";

#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mutate the abstract configuration (and status fields such as URLs)
    /// of a deep copy of the service.
    async fn transform_config(&self, _svc: &mut SpinnakerService) -> Result<()> {
        Ok(())
    }

    /// Mutate the generated manifests in place.
    async fn transform_manifests(
        &self,
        _svc: &SpinnakerService,
        _bundle: &mut GeneratedManifestBundle,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl Pipeline {
    pub fn new(transformers: Vec<Box<dyn Transformer>>) -> Self {
        Self { transformers }
    }

    /// The operator's transformers in registration order.
    pub fn standard(client: SharedClient) -> Self {
        Self::new(vec![
            Box::new(OwnerTransformer),
            Box::new(PatchesTransformer),
            Box::new(TargetTransformer),
            Box::new(ExposeTransformer::new(client.clone())),
            Box::new(ExposeIngressTransformer::new(client)),
            Box::new(ServerPortTransformer),
            Box::new(X509Transformer),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub async fn transform_config(&self, svc: &mut SpinnakerService) -> Result<()> {
        for t in &self.transformers {
            debug!(transformer = t.name(), "transforming config");
            t.transform_config(svc).await?;
        }
        Ok(())
    }

    pub async fn transform_manifests(
        &self,
        svc: &SpinnakerService,
        bundle: &mut GeneratedManifestBundle,
    ) -> Result<()> {
        for t in self.transformers.iter().rev() {
            debug!(transformer = t.name(), "transforming manifests");
            t.transform_manifests(svc, bundle).await?;
        }
        Ok(())
    }
}

pub(crate) fn status_mut(svc: &mut SpinnakerService) -> &mut SpinnakerServiceStatus {
    svc.status.get_or_insert_with(Default::default)
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bundle::ServiceConfig;
    use crate::cluster::MockClusterClient;
    use crate::transformer::fixtures;
    use serde_json::json;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transformer for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn transform_config(&self, _svc: &mut SpinnakerService) -> Result<()> {
            self.log.lock().unwrap().push(format!("config:{}", self.name));
            Ok(())
        }

        async fn transform_manifests(
            &self,
            _svc: &SpinnakerService,
            _bundle: &mut GeneratedManifestBundle,
        ) -> Result<()> {
            self.log.lock().unwrap().push(format!("manifests:{}", self.name));
            Ok(())
        }
    }

    /// Adds a brand new Service during the manifest phase.
    struct AddsService;

    #[async_trait]
    impl Transformer for AddsService {
        fn name(&self) -> &'static str {
            "adds-service"
        }

        async fn transform_manifests(
            &self,
            _svc: &SpinnakerService,
            bundle: &mut GeneratedManifestBundle,
        ) -> Result<()> {
            bundle.insert(
                "extra".into(),
                ServiceConfig {
                    service: Some(fixtures::service("extra", 80)),
                    ..Default::default()
                },
            );
            Ok(())
        }
    }

    #[tokio::test]
    async fn manifests_run_in_reverse_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            Box::new(Recorder { name: "a", log: log.clone() }),
            Box::new(Recorder { name: "b", log: log.clone() }),
        ]);
        let mut svc = fixtures::spinnaker_service(json!({}));
        let mut bundle = GeneratedManifestBundle::new();
        pipeline.transform_config(&mut svc).await.unwrap();
        pipeline.transform_manifests(&svc, &mut bundle).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["config:a", "config:b", "manifests:b", "manifests:a"]
        );
    }

    #[tokio::test]
    async fn owner_sees_objects_created_by_later_transformers() {
        let pipeline = Pipeline::new(vec![Box::new(OwnerTransformer), Box::new(AddsService)]);
        let svc = fixtures::spinnaker_service(json!({}));
        let mut bundle = fixtures::bundle();
        pipeline.transform_manifests(&svc, &mut bundle).await.unwrap();

        for (component, config) in &bundle {
            let svc = config.service.as_ref().unwrap();
            let owners = svc.metadata.owner_references.as_ref().unwrap();
            assert_eq!(owners[0].uid, "spin-uid", "{component} service is not owned");
        }
    }

    #[test]
    fn standard_pipeline_registers_owner_first() {
        let pipeline = Pipeline::standard(Arc::new(MockClusterClient::new()));
        assert_eq!(
            pipeline.names(),
            vec!["owner", "patches", "target", "expose", "expose-ingress", "server-port", "x509"]
        );
    }
}
