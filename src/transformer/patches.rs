//! User-declared overlays on generated Deployments and Services.
//!
//! For each object: merge patches in order, then one JSON patch, then
//! strategic merge patches in order. The object is decoded back into its typed
//! form after every step so a patch producing an invalid object is reported
//! with its index.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::Transformer;
use crate::bundle::GeneratedManifestBundle;
use crate::crd::{Kustomization, SpinnakerService};
use crate::{strategic, Error, Result};

const MERGE: &str = "merge patch";
const JSON6902: &str = "json patch";
const STRATEGIC: &str = "strategic merge patch";

pub struct PatchesTransformer;

fn parse(text: &str) -> std::result::Result<Value, serde_yaml::Error> {
    serde_yaml::from_str(text)
}

fn decode<T: DeserializeOwned>(
    value: Value,
    component: &str,
    target: &'static str,
    kind: &'static str,
    index: usize,
) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::patch(component, target, kind, index, e))
}

/// Apply every overlay of `patches` to `object`.
pub fn apply_patches<T>(
    object: &mut T,
    patches: &Kustomization,
    component: &str,
    target: &'static str,
) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    for (index, text) in patches.patches.iter().enumerate() {
        let patch = parse(text).map_err(|e| Error::patch(component, target, MERGE, index, e))?;
        let mut doc = serde_json::to_value(&*object)?;
        json_patch::merge(&mut doc, &patch);
        *object = decode(doc, component, target, MERGE, index)?;
    }

    if let Some(text) = &patches.patches_json6902 {
        let ops = parse(text).map_err(|e| Error::patch(component, target, JSON6902, 0, e))?;
        let ops: json_patch::Patch = serde_json::from_value(ops)
            .map_err(|e| Error::patch(component, target, JSON6902, 0, e))?;
        let mut doc = serde_json::to_value(&*object)?;
        json_patch::patch(&mut doc, &ops)
            .map_err(|e| Error::patch(component, target, JSON6902, 0, e))?;
        *object = decode(doc, component, target, JSON6902, 0)?;
    }

    for (index, text) in patches.patches_strategic_merge.iter().enumerate() {
        let patch =
            parse(text).map_err(|e| Error::patch(component, target, STRATEGIC, index, e))?;
        let doc = serde_json::to_value(&*object)?;
        let merged = strategic::apply(&doc, &patch)
            .map_err(|e| Error::patch(component, target, STRATEGIC, index, e))?;
        *object = decode(merged, component, target, STRATEGIC, index)?;
    }
    Ok(())
}

#[async_trait]
impl Transformer for PatchesTransformer {
    fn name(&self) -> &'static str {
        "patches"
    }

    async fn transform_manifests(
        &self,
        svc: &SpinnakerService,
        bundle: &mut GeneratedManifestBundle,
    ) -> Result<()> {
        for (component, kustomization) in &svc.spec.kustomize {
            let Some(generated) = bundle.get_mut(component) else {
                warn!(%component, "patches declared for a subcomponent that was not generated");
                continue;
            };
            if let (Some(patches), Some(deployment)) =
                (&kustomization.deployment, generated.deployment.as_mut())
            {
                debug!(%component, "patching deployment");
                apply_patches(deployment, patches, component, "deployment")?;
            }
            if let (Some(patches), Some(service)) =
                (&kustomization.service, generated.service.as_mut())
            {
                debug!(%component, "patching service");
                apply_patches(service, patches, component, "service")?;
            }
        }
        Ok(())
    }
}
