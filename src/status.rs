//! Health of the workloads created for a `SpinnakerService`.
//!
//! Every managed Deployment is inspected through its Pods. A Pod that is not
//! clearly healthy or clearly broken is judged by how long its ReplicaSet has
//! been waiting to become ready: past the stabilization window it counts as a
//! failure. The aggregate is the worst verdict seen.

use chrono::{Duration, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, instrument};

use crate::cluster::SharedClient;
use crate::crd::{DeploymentStatus, Health, SpinnakerService, SpinnakerServiceStatus};
use crate::transformer::owner::{MANAGED_BY, MANAGED_BY_LABEL};
use crate::{Error, Result};

const CONTAINER_CREATING: &str = "ContainerCreating";

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub health: Health,
    pub services: Vec<DeploymentStatus>,
}

impl StatusReport {
    pub fn apply_to(&self, status: &mut SpinnakerServiceStatus) {
        status.status = self.health;
        status.services = self.services.clone();
        status.service_count = self.services.len() as i32;
        status.ready_service_count = self
            .services
            .iter()
            .filter(|s| s.ready_replicas >= s.replicas)
            .count() as i32;
    }
}

pub struct StatusChecker {
    client: SharedClient,
    max_check: Duration,
}

/// Replica counts of a Deployment, desired defaulting to one.
fn replicas(deployment: &Deployment) -> (i32, i32) {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    (desired, ready)
}

fn snapshot(deployment: &Deployment) -> DeploymentStatus {
    let (replicas, ready_replicas) = replicas(deployment);
    let image = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone());
    DeploymentStatus {
        name: deployment.name_any(),
        image,
        replicas,
        ready_replicas,
    }
}

fn pod_selector(deployment: &Deployment) -> Option<String> {
    let labels = deployment.spec.as_ref()?.selector.match_labels.as_ref()?;
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn is_creating(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.as_deref())
        .any(|reason| reason == CONTAINER_CREATING)
}

fn all_containers_started(pod: &Pod) -> bool {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();
    !statuses.is_empty()
        && statuses.iter().all(|c| {
            c.state
                .as_ref()
                .and_then(|s| s.running.as_ref())
                .is_some_and(|r| r.started_at.is_some())
        })
}

impl StatusChecker {
    pub fn new(client: SharedClient, max_check: Duration) -> Self {
        Self { client, max_check }
    }

    #[instrument(skip(self, svc), fields(name = %svc.name_any()))]
    pub async fn check(&self, svc: &SpinnakerService) -> Result<StatusReport> {
        let namespace = svc
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let selector = format!("{MANAGED_BY_LABEL}={MANAGED_BY}");
        let deployments = self.client.list_deployments(&namespace, &selector).await?;
        if deployments.is_empty() {
            return Ok(StatusReport {
                health: Health::Na,
                services: Vec::new(),
            });
        }

        let mut health = Health::Ok;
        let mut services = Vec::with_capacity(deployments.len());
        for deployment in &deployments {
            let verdict = self.deployment_health(&namespace, deployment).await?;
            debug!(deployment = %deployment.name_any(), %verdict, "deployment health");
            health = health.worst(verdict);
            services.push(snapshot(deployment));
        }
        Ok(StatusReport { health, services })
    }

    async fn deployment_health(&self, namespace: &str, deployment: &Deployment) -> Result<Health> {
        let (desired, ready) = replicas(deployment);
        let pods = match pod_selector(deployment) {
            Some(selector) => self.client.list_pods(namespace, &selector).await?,
            None => Vec::new(),
        };
        if pods.is_empty() {
            return Ok(if ready < desired {
                Health::Updating
            } else {
                Health::Ok
            });
        }

        let mut health = Health::Ok;
        for pod in &pods {
            health = health.worst(self.pod_health(namespace, pod, desired, ready).await?);
            if health == Health::Failure {
                break;
            }
        }
        Ok(health)
    }

    async fn pod_health(&self, namespace: &str, pod: &Pod, desired: i32, ready: i32) -> Result<Health> {
        if pod.metadata.deletion_timestamp.is_some() {
            return Ok(Health::Updating);
        }
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        match phase {
            Some("Failed") | Some("Unknown") => Ok(Health::Failure),
            Some("Pending") if is_creating(pod) || ready < desired => Ok(Health::Updating),
            Some("Pending") => self.escalate(namespace, pod).await,
            Some("Running") if all_containers_started(pod) && ready == desired => Ok(Health::Ok),
            Some("Running") => self.escalate(namespace, pod).await,
            Some("Succeeded") => Ok(Health::Ok),
            _ => Ok(Health::Updating),
        }
    }

    /// Failure once the Pod's ReplicaSet has stayed short of ready for longer
    /// than the stabilization window, Updating before that.
    async fn escalate(&self, namespace: &str, pod: &Pod) -> Result<Health> {
        let owner = pod
            .owner_references()
            .iter()
            .find(|o| o.kind == "ReplicaSet")
            .map(|o| o.name.clone());
        let Some(owner) = owner else {
            return Ok(Health::Updating);
        };
        let Some(rs) = self.client.get_replica_set(namespace, &owner).await? else {
            return Ok(Health::Updating);
        };

        let desired = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = rs.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
        let Some(created) = rs.metadata.creation_timestamp.as_ref() else {
            return Ok(Health::Updating);
        };
        let waited = Utc::now() - created.0;
        if ready < desired && waited > self.max_check {
            debug!(replica_set = %owner, minutes = waited.num_minutes(), "replica set exceeded stabilization window");
            Ok(Health::Failure)
        } else {
            Ok(Health::Updating)
        }
    }
}
