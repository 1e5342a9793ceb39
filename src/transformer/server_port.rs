use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerPort, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use super::Transformer;
use crate::bundle::GeneratedManifestBundle;
use crate::config::SERVER_PORT_PATH;
use crate::crd::SpinnakerService;
use crate::{Error, Result};

/// Moves a subcomponent to the listen port set in its profile (`server.port`).
pub struct ServerPortTransformer;

/// Point `://localhost:<port>/health` references at `port`.
pub fn rewrite_health_port(command: &str, port: i32) -> String {
    const MARKER: &str = "://localhost:";
    let mut out = String::with_capacity(command.len());
    let mut rest = command;
    while let Some(at) = rest.find(MARKER) {
        let (head, tail) = rest.split_at(at + MARKER.len());
        out.push_str(head);
        let digits = tail.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 && tail[digits..].starts_with("/health") {
            out.push_str(&port.to_string());
            rest = &tail[digits..];
        } else {
            rest = tail;
        }
    }
    out.push_str(rest);
    out
}

fn rewrite_container(container: &mut Container, port: i32) -> Option<i32> {
    let ports = container.ports.get_or_insert_with(Vec::new);
    let previous = match ports.first_mut() {
        Some(first) => Some(std::mem::replace(&mut first.container_port, port)),
        None => {
            ports.push(ContainerPort {
                container_port: port,
                ..Default::default()
            });
            None
        }
    };
    let commands = container
        .readiness_probe
        .as_mut()
        .and_then(|probe| probe.exec.as_mut())
        .and_then(|exec| exec.command.as_mut());
    for arg in commands.into_iter().flatten() {
        *arg = rewrite_health_port(arg, port);
    }
    previous
}

/// An omitted targetPort defaults to the Service port, so it counts as `from`
/// when the Service port equals it.
fn retarget_service(service: &mut Service, from: i32, to: i32) {
    let ports = service.spec.as_mut().and_then(|spec| spec.ports.as_mut());
    for port in ports.into_iter().flatten() {
        let targets_from = match &port.target_port {
            Some(target) => *target == IntOrString::Int(from),
            None => port.port == from,
        };
        if targets_from {
            port.target_port = Some(IntOrString::Int(to));
        }
    }
}

#[async_trait]
impl Transformer for ServerPortTransformer {
    fn name(&self) -> &'static str {
        "server-port"
    }

    async fn transform_manifests(
        &self,
        svc: &SpinnakerService,
        bundle: &mut GeneratedManifestBundle,
    ) -> Result<()> {
        let config = &svc.spec.spinnaker_config;
        for (component, generated) in bundle.iter_mut() {
            let Some(port) = config.profile_i64(component, SERVER_PORT_PATH)? else {
                continue;
            };
            let port = i32::try_from(port)
                .map_err(|_| Error::invalid_manifest(component.as_str(), "server.port out of range"))?;
            let Some(deployment) = generated.deployment.as_mut() else {
                continue;
            };
            let containers = deployment
                .spec
                .as_mut()
                .and_then(|spec| spec.template.spec.as_mut())
                .map(|pod| &mut pod.containers);
            let Some(containers) = containers else {
                continue;
            };
            let index = containers
                .iter()
                .position(|c| &c.name == component)
                .unwrap_or(0);
            let Some(container) = containers.get_mut(index) else {
                continue;
            };
            debug!(%component, port, "rewriting server port");
            let previous = rewrite_container(container, port);
            if let (Some(previous), Some(service)) = (previous, generated.service.as_mut()) {
                retarget_service(service, previous, port);
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
    use crate::transformer::expose::ExposeTransformer;
    use crate::transformer::{fixtures, Pipeline};
    use serde_json::json;

    #[test]
    fn rewrites_only_health_urls() {
        assert_eq!(
            rewrite_health_port("wget -q http://localhost:8084/health", 9090),
            "wget -q http://localhost:9090/health"
        );
        assert_eq!(
            rewrite_health_port("https://localhost:8084/health && http://localhost:7002/other", 1),
            "https://localhost:1/health && http://localhost:7002/other"
        );
        assert_eq!(rewrite_health_port("localhost:8084/health", 1), "localhost:8084/health");
    }

    #[tokio::test]
    async fn applies_profile_port_to_container_probe_and_service() {
        let svc = fixtures::spinnaker_service(json!({
            "spinnakerConfig": {"profiles": {"gate": {"server": {"port": 8085}}}}
        }));
        let mut bundle = fixtures::bundle();
        ServerPortTransformer
            .transform_manifests(&svc, &mut bundle)
            .await
            .unwrap();

        let deployment = bundle["gate"].deployment.as_ref().unwrap();
        let container = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8085);
        let command = container
            .readiness_probe
            .as_ref()
            .unwrap()
            .exec
            .as_ref()
            .unwrap()
            .command
            .clone()
            .unwrap();
        assert_eq!(command.last().unwrap(), "http://localhost:8085/health");

        let service = bundle["gate"].service.as_ref().unwrap();
        let port = &service.spec.as_ref().unwrap().ports.as_ref().unwrap()[0];
        assert_eq!(port.target_port, Some(IntOrString::Int(8085)));

        let deck = bundle["deck"].deployment.as_ref().unwrap();
        let deck_container = &deck.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(deck_container.ports.as_ref().unwrap()[0].container_port, 9000);
    }

    #[tokio::test]
    async fn implicit_target_port_follows_the_container_through_exposure() {
        let svc = fixtures::spinnaker_service(json!({
            "expose": {"type": "service", "service": {"publicPort": 80}},
            "spinnakerConfig": {"profiles": {"gate": {"server": {"port": 8085}}}}
        }));
        let mut bundle = fixtures::bundle();
        bundle
            .get_mut("gate")
            .and_then(|c| c.service.as_mut())
            .and_then(|s| s.spec.as_mut())
            .and_then(|spec| spec.ports.as_mut())
            .unwrap()[0]
            .target_port = None;

        let pipeline = Pipeline::new(vec![
            Box::new(ExposeTransformer::new(Arc::new(MockClusterClient::new()))),
            Box::new(ServerPortTransformer),
        ]);
        pipeline.transform_manifests(&svc, &mut bundle).await.unwrap();

        let deployment = bundle["gate"].deployment.as_ref().unwrap();
        let container = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8085);
        let port = &bundle["gate"].service.as_ref().unwrap().spec.as_ref().unwrap().ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8085)));
    }

    #[tokio::test]
    async fn non_numeric_port_is_a_configuration_error() {
        let svc = fixtures::spinnaker_service(json!({
            "spinnakerConfig": {"profiles": {"gate": {"server": {"port": "eighty"}}}}
        }));
        let mut bundle = fixtures::bundle();
        let err = ServerPortTransformer
            .transform_manifests(&svc, &mut bundle)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
