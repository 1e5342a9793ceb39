//! Kubernetes Events recorded on `SpinnakerService` resources.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails
//! the reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller` is reported as the event's reporting component.
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

pub mod reasons {
    /// The spec changed and a new set of manifests is being applied.
    pub const CONFIG_CHANGED: &str = "ConfigChanged";
    /// All managed workloads became healthy.
    pub const DEPLOYED: &str = "Deployed";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const DEPLOY: &str = "Deploy";
}

