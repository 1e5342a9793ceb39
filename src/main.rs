use std::error::Error;
use std::fmt::Write;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::{Config, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, CustomResourceExt};
use tracing::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spinnaker_operator::cluster::KubeClusterClient;
use spinnaker_operator::crd::SpinnakerService;
use spinnaker_operator::events::KubeEventPublisher;
use spinnaker_operator::generator::HalyardGenerator;
use spinnaker_operator::reconcile::{error_policy, reconcile, Context};
use spinnaker_operator::settings::Settings;
use spinnaker_operator::transformer::owner::{MANAGED_BY, MANAGED_BY_LABEL};

fn namespaced<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::parse();

    if settings.crd {
        println!("{}", serde_yaml::to_string(&SpinnakerService::crd())?);
        return Ok(());
    }

    let client = Client::try_default()
        .await
        .context("Failed to create kubernetes client")?;
    let namespace = settings.watch_namespace.as_deref();

    let services = namespaced::<SpinnakerService>(&client, namespace);
    let deployments = namespaced::<Deployment>(&client, namespace);
    let owned_services = namespaced::<Service>(&client, namespace);
    let managed = watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY}"));

    let generator = HalyardGenerator::new(&settings.halyard_url, settings.generator_timeout())
        .context("Failed to create manifest generator client")?;
    let context = Context::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(generator),
        Arc::new(KubeEventPublisher::new(client.clone(), MANAGED_BY)),
        settings.clone(),
    );

    info!(
        namespace = namespace.unwrap_or("*"),
        concurrency = settings.concurrency,
        "starting spinnaker operator"
    );

    Controller::new(services, watcher::Config::default())
        .owns(deployments, managed.clone())
        .owns(owned_services, managed)
        .with_config(Config::default().concurrency(settings.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(context))
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("reconciled {:?}", o),
                Err(err) => {
                    let mut msg = err.to_string();
                    let mut source = err.source();
                    while let Some(src) = source {
                        let _ = write!(msg, ": {src}");
                        source = src.source();
                    }
                    error!("reconcile failed: {}", msg);
                }
            }
        })
        .await;
    info!("controller terminated");
    Ok(())
}
