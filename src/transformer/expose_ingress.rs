//! URL discovery for gate and deck published through Ingress objects.

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use super::expose::{override_url, override_url_path, set_status_url, EXPOSED_COMPONENTS};
use super::{status_mut, Transformer};
use crate::bundle::service_name;
use crate::cluster::{build_api_resource, SharedClient};
use crate::crd::SpinnakerService;
use crate::{Error, Result};

/// One routing rule flattened from either Ingress API version.
#[derive(Debug, Clone, PartialEq)]
pub struct IngressRoute {
    pub host: String,
    pub path: String,
    pub service: String,
    pub tls: bool,
}

impl IngressRoute {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        let path = self.path.trim_end_matches('*').trim_end_matches('/');
        format!("{scheme}://{}{path}", self.host)
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Routes of one Ingress, in `networking.k8s.io/v1` or `extensions/v1beta1` form.
pub fn routes(ingress: &DynamicObject) -> Vec<IngressRoute> {
    let data = &ingress.data;
    let tls_hosts: Vec<&str> = data
        .pointer("/spec/tls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|tls| tls.get("hosts").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .collect();

    let mut routes = Vec::new();
    let rules = data.pointer("/spec/rules").and_then(Value::as_array);
    for rule in rules.into_iter().flatten() {
        let Some(host) = rule.get("host").and_then(Value::as_str).filter(|h| !h.is_empty()) else {
            continue;
        };
        let paths = rule.pointer("/http/paths").and_then(Value::as_array);
        for path in paths.into_iter().flatten() {
            let service = str_at(path, "/backend/service/name")
                .or_else(|| str_at(path, "/backend/serviceName"));
            if let Some(service) = service {
                routes.push(IngressRoute {
                    host: host.to_string(),
                    path: str_at(path, "/path").unwrap_or_default().to_string(),
                    service: service.to_string(),
                    tls: tls_hosts.contains(&host),
                });
            }
        }
    }
    routes
}

pub struct ExposeIngressTransformer {
    client: SharedClient,
}

impl ExposeIngressTransformer {
    pub fn new(client: SharedClient) -> Self {
        Self { client }
    }

    async fn list(&self, resource: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>> {
        match self.client.list_objects(resource, namespace).await {
            Err(Error::Kube(kube::Error::Api(ae))) if ae.code == 404 => {
                debug!(api_version = %resource.api_version, "ingress api not served");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Ingresses from the current and the legacy API group, fetched concurrently.
    pub async fn ingresses(&self, namespace: &str) -> Result<Vec<DynamicObject>> {
        let current = build_api_resource("networking.k8s.io/v1", "Ingress");
        let legacy = build_api_resource("extensions/v1beta1", "Ingress");
        let (mut ingresses, legacy) = futures::try_join!(
            self.list(&current, namespace),
            self.list(&legacy, namespace)
        )?;
        ingresses.extend(legacy);
        Ok(ingresses)
    }
}

#[async_trait]
impl Transformer for ExposeIngressTransformer {
    fn name(&self) -> &'static str {
        "expose-ingress"
    }

    async fn transform_config(&self, svc: &mut SpinnakerService) -> Result<()> {
        if svc.expose().is_service() {
            return Ok(());
        }
        let mut pending = Vec::new();
        for component in EXPOSED_COMPONENTS {
            if override_url(&svc.spec.spinnaker_config, component)?.is_none() {
                pending.push(component);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let namespace = svc
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let routes: Vec<IngressRoute> = self
            .ingresses(&namespace)
            .await?
            .iter()
            .flat_map(routes)
            .collect();

        for component in pending {
            let target = service_name(component);
            if let Some(route) = routes.iter().find(|r| r.service == target) {
                let url = route.url();
                info!(%component, %url, "discovered ingress url");
                svc.spec
                    .spinnaker_config
                    .set_hal_config_prop(override_url_path(component), Value::String(url.clone()))?;
                set_status_url(status_mut(svc), component, url);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::config::GATE_OVERRIDE_URL_PATH;
    use crate::transformer::fixtures;
    use kube::core::ErrorResponse;
    use serde_json::json;

    fn ingress(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn current_ingress() -> DynamicObject {
        ingress(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {"name": "spinnaker"},
            "spec": {
                "tls": [{"hosts": ["spinnaker.example.com"]}],
                "rules": [{
                    "host": "spinnaker.example.com",
                    "http": {"paths": [
                        {"path": "/api/v1/*", "backend": {"service": {"name": "spin-gate", "port": {"number": 8084}}}},
                        {"path": "/", "backend": {"service": {"name": "spin-deck", "port": {"number": 9000}}}}
                    ]}
                }]
            }
        }))
    }

    fn legacy_ingress() -> DynamicObject {
        ingress(json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "Ingress",
            "metadata": {"name": "gate"},
            "spec": {"rules": [{
                "host": "gate.internal",
                "http": {"paths": [{"backend": {"serviceName": "spin-gate", "servicePort": 8084}}]}
            }]}
        }))
    }

    #[test]
    fn flattens_both_api_versions() {
        let routes = routes(&current_ingress());
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].url(), "https://spinnaker.example.com/api/v1");
        assert_eq!(routes[1].url(), "https://spinnaker.example.com");

        let legacy = super::routes(&legacy_ingress());
        assert_eq!(legacy[0].url(), "http://gate.internal");
    }

    #[tokio::test]
    async fn discovers_urls_from_merged_ingress_lists() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_objects().times(2).returning(|ar, _| {
            Ok(if ar.group == "extensions" {
                vec![legacy_ingress()]
            } else {
                vec![current_ingress()]
            })
        });
        let mut svc = fixtures::spinnaker_service(json!({}));
        ExposeIngressTransformer::new(Arc::new(mock))
            .transform_config(&mut svc)
            .await
            .unwrap();
        let status = svc.status.clone().unwrap();
        assert_eq!(status.api_url, "https://spinnaker.example.com/api/v1");
        assert_eq!(status.ui_url, "https://spinnaker.example.com");
        assert_eq!(
            svc.spec.spinnaker_config.hal_string(GATE_OVERRIDE_URL_PATH).unwrap(),
            Some("https://spinnaker.example.com/api/v1".into())
        );
    }

    #[tokio::test]
    async fn missing_legacy_group_counts_as_empty() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_objects().returning(|ar, _| {
            if ar.group == "extensions" {
                Err(Error::Kube(kube::Error::Api(ErrorResponse {
                    status: "Failure".into(),
                    message: "not found".into(),
                    reason: "NotFound".into(),
                    code: 404,
                })))
            } else {
                Ok(vec![])
            }
        });
        let transformer = ExposeIngressTransformer::new(Arc::new(mock));
        assert!(transformer.ingresses("spinnaker").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_list_errors_abort() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_objects().returning(|ar, _| {
            if ar.group == "networking.k8s.io" {
                Err(Error::MissingObjectKey("boom"))
            } else {
                Ok(vec![])
            }
        });
        let mut svc = fixtures::spinnaker_service(json!({}));
        assert!(ExposeIngressTransformer::new(Arc::new(mock))
            .transform_config(&mut svc)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn skipped_for_service_exposure() {
        let mut mock = MockClusterClient::new();
        mock.expect_list_objects().times(0);
        let mut svc = fixtures::spinnaker_service(json!({"expose": {"type": "service"}}));
        ExposeIngressTransformer::new(Arc::new(mock))
            .transform_config(&mut svc)
            .await
            .unwrap();
        assert!(svc.status.is_none());
    }
}
