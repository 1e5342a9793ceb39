//! Publication of gate (API) and deck (UI) through Kubernetes Services.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use super::{status_mut, Transformer, DECK, GATE};
use crate::bundle::{service_name, GeneratedManifestBundle};
use crate::cluster::SharedClient;
use crate::config::{
    SpinnakerConfig, DECK_OVERRIDE_URL_PATH, DECK_SSL_ENABLED_PATH, GATE_OVERRIDE_URL_PATH,
    GATE_SSL_ENABLED_PATH,
};
use crate::crd::{ExposeConfig, SpinnakerService, SpinnakerServiceStatus, CLUSTER_IP};
use crate::{Error, Result};

/// Subcomponents reachable from outside the cluster.
pub const EXPOSED_COMPONENTS: [&str; 2] = [GATE, DECK];

pub fn override_url_path(component: &str) -> &'static str {
    if component == GATE {
        GATE_OVERRIDE_URL_PATH
    } else {
        DECK_OVERRIDE_URL_PATH
    }
}

fn ssl_enabled_path(component: &str) -> &'static str {
    if component == GATE {
        GATE_SSL_ENABLED_PATH
    } else {
        DECK_SSL_ENABLED_PATH
    }
}

/// Configured override base URL for `component`, if any.
pub fn override_url(config: &SpinnakerConfig, component: &str) -> Result<Option<String>> {
    Ok(config
        .hal_string(override_url_path(component))?
        .filter(|url| !url.is_empty()))
}

pub fn is_ssl_enabled(config: &SpinnakerConfig, component: &str) -> Result<bool> {
    Ok(config.hal_bool(ssl_enabled_path(component))?.unwrap_or(false))
}

pub fn status_url<'a>(status: &'a SpinnakerServiceStatus, component: &str) -> &'a str {
    if component == GATE {
        &status.api_url
    } else {
        &status.ui_url
    }
}

pub fn set_status_url(status: &mut SpinnakerServiceStatus, component: &str, url: String) {
    if component == GATE {
        status.api_url = url;
    } else {
        status.ui_url = url;
    }
}

/// External URL of a LoadBalancer Service once an ingress address is assigned.
pub fn load_balancer_url(service: &Service, https: bool) -> Option<String> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?;
    let host = ingress
        .hostname
        .clone()
        .filter(|h| !h.is_empty())
        .or_else(|| ingress.ip.clone().filter(|ip| !ip.is_empty()))?;
    let port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|p| p.port);
    let scheme = if https { "https" } else { "http" };
    Some(match (https, port) {
        (_, None) | (false, Some(80)) | (true, Some(443)) => format!("{scheme}://{host}"),
        (_, Some(port)) => format!("{scheme}://{host}:{port}"),
    })
}

/// Adjust a generated Service to the exposure policy of `component`.
pub fn apply_exposure(service: &mut Service, expose: &ExposeConfig, component: &str) {
    let spec = service.spec.get_or_insert_with(Default::default);
    if !expose.is_service() {
        spec.type_ = Some(CLUSTER_IP.to_string());
        service.metadata.annotations = None;
        return;
    }
    spec.type_ = Some(expose.service_type_for(component));
    let annotations = expose.annotations_for(component);
    service.metadata.annotations = if annotations.is_empty() {
        None
    } else {
        Some(annotations)
    };
    if let Some(public_port) = expose.public_port_for(component) {
        if let Some(port) = spec.ports.as_mut().and_then(|ports| ports.first_mut()) {
            if port.target_port.is_none() {
                port.target_port = Some(IntOrString::Int(port.port));
            }
            port.port = public_port;
            port.name = Some("http".to_string());
        }
    }
}

pub struct ExposeTransformer {
    client: SharedClient,
}

impl ExposeTransformer {
    pub fn new(client: SharedClient) -> Self {
        Self { client }
    }

    async fn discover_url(
        &self,
        namespace: &str,
        component: &str,
        https: bool,
    ) -> Result<Option<String>> {
        let name = service_name(component);
        let Some(live) = self.client.get_service(namespace, &name).await? else {
            debug!(service = %name, "service not created yet, no url to discover");
            return Ok(None);
        };
        Ok(load_balancer_url(&live, https))
    }
}

#[async_trait]
impl Transformer for ExposeTransformer {
    fn name(&self) -> &'static str {
        "expose"
    }

    async fn transform_config(&self, svc: &mut SpinnakerService) -> Result<()> {
        let namespace = svc
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        for component in EXPOSED_COMPONENTS {
            if let Some(url) = override_url(&svc.spec.spinnaker_config, component)? {
                set_status_url(status_mut(svc), component, url);
                continue;
            }
            if !svc.expose().is_service() {
                continue;
            }
            let https = is_ssl_enabled(&svc.spec.spinnaker_config, component)?;
            if let Some(url) = self.discover_url(&namespace, component, https).await? {
                info!(%component, %url, "discovered load balancer url");
                svc.spec
                    .spinnaker_config
                    .set_hal_config_prop(override_url_path(component), Value::String(url.clone()))?;
                set_status_url(status_mut(svc), component, url);
            }
        }
        Ok(())
    }

    async fn transform_manifests(
        &self,
        svc: &SpinnakerService,
        bundle: &mut GeneratedManifestBundle,
    ) -> Result<()> {
        for component in EXPOSED_COMPONENTS {
            if let Some(service) = bundle.get_mut(component).and_then(|c| c.service.as_mut()) {
                apply_exposure(service, svc.expose(), component);
            }
        }
        Ok(())
    }
}
