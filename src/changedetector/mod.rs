//! Predicates deciding whether the live cluster already matches the desired state.
//!
//! Each detector covers one concern. The composite is their conjunction and
//! stops at the first detector that reports drift or fails. Errors are never
//! folded into "out of date": a detector that cannot reach the cluster aborts
//! the pass.

use async_trait::async_trait;
use tracing::debug;

use crate::cluster::SharedClient;
use crate::crd::SpinnakerService;
use crate::Result;

pub mod config;
pub mod expose;
pub mod x509;

pub use config::{config_fingerprint, ConfigChangeDetector, CONFIG_KEY};
pub use expose::ExposeChangeDetector;
pub use x509::X509ChangeDetector;

#[async_trait]
pub trait ChangeDetector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_up_to_date(&self, svc: &SpinnakerService) -> Result<bool>;
}

pub struct CompositeChangeDetector {
    detectors: Vec<Box<dyn ChangeDetector>>,
}

impl CompositeChangeDetector {
    pub fn new(detectors: Vec<Box<dyn ChangeDetector>>) -> Self {
        Self { detectors }
    }

    pub fn standard(client: SharedClient) -> Self {
        Self::new(vec![
            Box::new(ConfigChangeDetector),
            Box::new(ExposeChangeDetector::new(client.clone())),
            Box::new(X509ChangeDetector::new(client)),
        ])
    }
}

#[async_trait]
impl ChangeDetector for CompositeChangeDetector {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn is_up_to_date(&self, svc: &SpinnakerService) -> Result<bool> {
        for detector in &self.detectors {
            if !detector.is_up_to_date(svc).await? {
                debug!(detector = detector.name(), "spinnaker service out of date");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::transformer::fixtures;
    use crate::Error;
    use serde_json::json;

    enum Verdict {
        UpToDate,
        Stale,
        Fails,
    }

    struct Fixed {
        verdict: Verdict,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChangeDetector for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn is_up_to_date(&self, _svc: &SpinnakerService) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.verdict {
                Verdict::UpToDate => Ok(true),
                Verdict::Stale => Ok(false),
                Verdict::Fails => Err(Error::MissingObjectKey("cluster unreachable")),
            }
        }
    }

    fn composite(verdicts: Vec<Verdict>) -> (CompositeChangeDetector, Vec<Arc<AtomicUsize>>) {
        let mut counters = Vec::new();
        let detectors = verdicts
            .into_iter()
            .map(|verdict| {
                let calls = Arc::new(AtomicUsize::new(0));
                counters.push(calls.clone());
                Box::new(Fixed { verdict, calls }) as Box<dyn ChangeDetector>
            })
            .collect();
        (CompositeChangeDetector::new(detectors), counters)
    }

    fn calls(counters: &[Arc<AtomicUsize>]) -> Vec<usize> {
        counters.iter().map(|c| c.load(Ordering::SeqCst)).collect()
    }

    #[tokio::test]
    async fn up_to_date_only_when_every_detector_agrees() {
        let svc = fixtures::spinnaker_service(json!({}));
        let (all_good, counters) = composite(vec![Verdict::UpToDate, Verdict::UpToDate]);
        assert!(all_good.is_up_to_date(&svc).await.unwrap());
        assert_eq!(calls(&counters), vec![1, 1]);
    }

    #[tokio::test]
    async fn first_stale_detector_short_circuits() {
        let svc = fixtures::spinnaker_service(json!({}));
        let (detector, counters) =
            composite(vec![Verdict::UpToDate, Verdict::Stale, Verdict::UpToDate]);
        assert!(!detector.is_up_to_date(&svc).await.unwrap());
        assert_eq!(calls(&counters), vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn errors_propagate_instead_of_reporting_drift() {
        let svc = fixtures::spinnaker_service(json!({}));
        let (detector, counters) = composite(vec![Verdict::Fails, Verdict::Stale]);
        assert!(detector.is_up_to_date(&svc).await.is_err());
        assert_eq!(calls(&counters), vec![1, 0]);
    }
}
