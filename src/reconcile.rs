//! Reconciliation of one `SpinnakerService`.
//!
//! When the change detectors agree that the cluster matches the resource,
//! only the health status is refreshed. Otherwise a deep copy of the resource
//! goes through the transformer pipeline and the generator, the result is
//! persisted, and the status records the deployed fingerprint.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::changedetector::{
    config_fingerprint, ChangeDetector, CompositeChangeDetector, ConfigChangeDetector, CONFIG_KEY,
};
use crate::cluster::SharedClient;
use crate::crd::{HashStatus, Health, SpinnakerService, SpinnakerServiceStatus};
use crate::events::{actions, reasons, EventPublisher};
use crate::generator::ManifestGenerator;
use crate::persist::ManifestPersister;
use crate::settings::Settings;
use crate::status::StatusChecker;
use crate::transformer::Pipeline;
use crate::{Error, Result};

pub struct Context {
    pub client: SharedClient,
    pub generator: Arc<dyn ManifestGenerator>,
    pub pipeline: Pipeline,
    pub detector: Box<dyn ChangeDetector>,
    pub persister: ManifestPersister,
    pub status_checker: StatusChecker,
    pub events: Arc<dyn EventPublisher>,
    pub settings: Settings,
}

impl Context {
    /// Context wired with the standard transformers and detectors.
    pub fn new(
        client: SharedClient,
        generator: Arc<dyn ManifestGenerator>,
        events: Arc<dyn EventPublisher>,
        settings: Settings,
    ) -> Self {
        Self {
            pipeline: Pipeline::standard(client.clone()),
            detector: Box::new(CompositeChangeDetector::standard(client.clone())),
            persister: ManifestPersister::new(client.clone()),
            status_checker: StatusChecker::new(client.clone(), settings.max_check()),
            client,
            generator,
            events,
            settings,
        }
    }
}

/// Reconcile entry point; failures are also recorded as a Warning event on
/// the resource.
#[instrument(skip(svc, ctx), fields(name = %svc.name_any(), namespace = ?svc.namespace()))]
pub async fn reconcile(svc: Arc<SpinnakerService>, ctx: Arc<Context>) -> Result<Action> {
    match sync(&svc, &ctx).await {
        Ok(action) => Ok(action),
        Err(e) => {
            ctx.events
                .publish(
                    &svc.object_ref(&()),
                    EventType::Warning,
                    reasons::RECONCILE_FAILED,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            Err(e)
        }
    }
}

async fn sync(svc: &SpinnakerService, ctx: &Context) -> Result<Action> {
    let namespace = svc
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    if ctx.detector.is_up_to_date(svc).await? {
        refresh_status(svc, &namespace, ctx).await?;
        return Ok(Action::requeue(Duration::from_secs(
            ctx.settings.status_requeue_seconds,
        )));
    }

    deploy(svc, &namespace, ctx).await?;
    Ok(Action::requeue(Duration::from_secs(
        ctx.settings.deploy_requeue_seconds,
    )))
}

async fn refresh_status(svc: &SpinnakerService, namespace: &str, ctx: &Context) -> Result<()> {
    let report = ctx.status_checker.check(svc).await?;
    let previous = svc.status_or_default();
    let mut status = previous.clone();
    report.apply_to(&mut status);
    if status == previous {
        return Ok(());
    }

    ctx.client
        .patch_status(namespace, &svc.name_any(), &status)
        .await?;
    announce_deployed(svc, &previous, &status, ctx).await;
    Ok(())
}

async fn announce_deployed(
    svc: &SpinnakerService,
    previous: &SpinnakerServiceStatus,
    status: &SpinnakerServiceStatus,
    ctx: &Context,
) {
    if status.status != Health::Ok || previous.status == Health::Ok {
        return;
    }
    info!(version = %status.version, "spinnaker deployed");
    ctx.events
        .publish(
            &svc.object_ref(&()),
            EventType::Normal,
            reasons::DEPLOYED,
            actions::DEPLOY,
            Some(format!("Spinnaker {} is up", status.version)),
        )
        .await;
}

async fn deploy(svc: &SpinnakerService, namespace: &str, ctx: &Context) -> Result<()> {
    let fingerprint = config_fingerprint(svc)?;
    let mut desired = svc.clone();
    let version = desired.spec.spinnaker_config.version()?;
    if ConfigChangeDetector.is_up_to_date(svc).await? {
        info!(%version, "cluster drifted from configuration, redeploying");
    } else {
        info!(%version, "configuration changed, deploying");
        ctx.events
            .publish(
                &svc.object_ref(&()),
                EventType::Normal,
                reasons::CONFIG_CHANGED,
                actions::DEPLOY,
                Some(format!("deploying Spinnaker {version}")),
            )
            .await;
    }

    ctx.pipeline.transform_config(&mut desired).await?;
    let mut bundle = ctx
        .generator
        .generate(&desired.name_any(), &desired.spec.spinnaker_config)
        .await?;
    ctx.pipeline.transform_manifests(&desired, &mut bundle).await?;
    ctx.persister.persist_bundle(&bundle, namespace).await?;

    let report = ctx.status_checker.check(&desired).await?;
    let mut status: SpinnakerServiceStatus = desired.status_or_default();
    report.apply_to(&mut status);
    status.version = version;
    status.last_deployed.insert(
        CONFIG_KEY.to_string(),
        HashStatus {
            hash: fingerprint,
            last_updated_at: Some(Utc::now().to_rfc3339()),
        },
    );
    ctx.client
        .patch_status(namespace, &svc.name_any(), &status)
        .await?;
    announce_deployed(svc, &svc.status_or_default(), &status, ctx).await;
    Ok(())
}

pub fn error_policy(svc: Arc<SpinnakerService>, error: &Error, ctx: Arc<Context>) -> Action {
    let transient = error.is_transient();
    if transient {
        warn!(%error, name = %svc.name_any(), "reconciliation failed, retrying");
        Action::requeue(Duration::from_secs(ctx.settings.error_requeue_seconds))
    } else {
        error!(%error, name = %svc.name_any(), "reconciliation failed");
        Action::requeue(Duration::from_secs(ctx.settings.status_requeue_seconds))
    }
}
