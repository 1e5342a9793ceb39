use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::debug;

use super::ChangeDetector;
use crate::bundle::service_name;
use crate::cluster::SharedClient;
use crate::crd::{ExposeConfig, SpinnakerService, CLUSTER_IP, DEFAULT_EXPOSED_SERVICE_TYPE};
use crate::transformer::expose::{
    is_ssl_enabled, load_balancer_url, override_url, status_url, EXPOSED_COMPONENTS,
};
use crate::{Error, Result};

/// Compares the live gate and deck Services with the exposure policy.
pub struct ExposeChangeDetector {
    client: SharedClient,
}

impl ExposeChangeDetector {
    pub fn new(client: SharedClient) -> Self {
        Self { client }
    }
}

fn desired_type(expose: &ExposeConfig, component: &str) -> String {
    if expose.is_service() {
        expose.service_type_for(component)
    } else {
        CLUSTER_IP.to_string()
    }
}

/// Every expected annotation must be present with the same value. Extra live
/// annotations set by other controllers are tolerated.
fn annotations_match(live: &Service, expose: &ExposeConfig, component: &str) -> bool {
    if !expose.is_service() {
        return true;
    }
    let live_annotations = live.annotations();
    expose
        .annotations_for(component)
        .iter()
        .all(|(k, v)| live_annotations.get(k) == Some(v))
}

#[async_trait]
impl ChangeDetector for ExposeChangeDetector {
    fn name(&self) -> &'static str {
        "expose"
    }

    async fn is_up_to_date(&self, svc: &SpinnakerService) -> Result<bool> {
        let expose = svc.expose();
        if !expose.is_set() {
            return Ok(true);
        }
        let namespace = svc
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let status = svc.status_or_default();
        let config = &svc.spec.spinnaker_config;

        for component in EXPOSED_COMPONENTS {
            let name = service_name(component);
            let Some(live) = self.client.get_service(&namespace, &name).await? else {
                debug!(service = %name, "exposed service missing");
                return Ok(false);
            };

            let live_type = live
                .spec
                .as_ref()
                .and_then(|s| s.type_.clone())
                .unwrap_or_else(|| CLUSTER_IP.to_string());
            let wanted = desired_type(expose, component);
            if live_type != wanted {
                debug!(service = %name, %live_type, %wanted, "service type changed");
                return Ok(false);
            }
            if !annotations_match(&live, expose, component) {
                debug!(service = %name, "service annotations changed");
                return Ok(false);
            }

            // Only a LoadBalancer can ever yield an address to discover.
            if !expose.is_service()
                || live_type != DEFAULT_EXPOSED_SERVICE_TYPE
                || !status_url(&status, component).is_empty()
                || override_url(config, component)?.is_some()
            {
                continue;
            }
            let https = is_ssl_enabled(config, component)?;
            match load_balancer_url(&live, https) {
                Some(url) => debug!(%component, %url, "load balancer address available"),
                None => debug!(%component, "waiting for load balancer address"),
            }
            return Ok(false);
        }
        Ok(true)
    }
}
