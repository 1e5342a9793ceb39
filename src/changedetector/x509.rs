use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use tracing::debug;

use super::ChangeDetector;
use crate::bundle::service_name;
use crate::cluster::SharedClient;
use crate::crd::SpinnakerService;
use crate::transformer::x509::{x509_port, x509_public_port};
use crate::transformer::GATE_X509;
use crate::{Error, Result};

/// Checks that the derived mTLS Service exists exactly when gate declares an
/// api port, and that it routes that port.
pub struct X509ChangeDetector {
    client: SharedClient,
}

impl X509ChangeDetector {
    pub fn new(client: SharedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChangeDetector for X509ChangeDetector {
    fn name(&self) -> &'static str {
        "x509"
    }

    async fn is_up_to_date(&self, svc: &SpinnakerService) -> Result<bool> {
        let expose = svc.expose();
        if !expose.is_set() {
            return Ok(true);
        }
        let namespace = svc
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = service_name(GATE_X509);
        let declared = x509_port(&svc.spec.spinnaker_config)?;
        let live = self.client.get_service(&namespace, &name).await?;

        match (declared, live) {
            (None, None) => Ok(true),
            (None, Some(_)) => {
                debug!(service = %name, "x509 port removed but service still present");
                Ok(false)
            }
            (Some(_), None) => {
                debug!(service = %name, "x509 port declared but service missing");
                Ok(false)
            }
            (Some(api_port), Some(live)) => {
                let public_port = x509_public_port(expose, api_port);
                let routed = live
                    .spec
                    .and_then(|s| s.ports)
                    .unwrap_or_default()
                    .iter()
                    .any(|p| {
                        p.port == public_port && p.target_port == Some(IntOrString::Int(api_port))
                    });
                if !routed {
                    debug!(service = %name, api_port, public_port, "x509 service ports changed");
                }
                Ok(routed)
            }
        }
    }
}
