use std::time::Duration;

use clap::Parser;

/// Kubernetes operator keeping Spinnaker installations in sync with `SpinnakerService` resources
#[derive(Parser, Debug, Clone)]
#[command(name = "spinnaker-operator", version, about, long_about = None)]
pub struct Settings {
    /// Print the SpinnakerService CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Base URL of the manifest generator
    #[arg(long, env = "HALYARD_URL", default_value = "http://localhost:8064")]
    pub halyard_url: String,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Resources reconciled in parallel
    #[arg(long, env = "CONCURRENCY", default_value_t = 2)]
    pub concurrency: u16,

    /// Minutes a ReplicaSet may stay unready before it is reported as failed
    #[arg(long, env = "MAX_CHECK_MINUTES", default_value_t = 5)]
    pub max_check_minutes: i64,

    /// Seconds between status checks of a deployed service
    #[arg(long = "requeue-seconds", env = "REQUEUE_SECONDS", default_value_t = 30)]
    pub status_requeue_seconds: u64,

    /// Seconds before re-checking a service that was just deployed
    #[arg(long, default_value_t = 10)]
    pub deploy_requeue_seconds: u64,

    /// Seconds before retrying after a transient failure
    #[arg(long, default_value_t = 5)]
    pub error_requeue_seconds: u64,

    /// Timeout in seconds for manifest generation requests
    #[arg(long, env = "HALYARD_TIMEOUT_SECONDS", default_value_t = 60)]
    pub generator_timeout_seconds: u64,
}

impl Settings {
    pub fn max_check(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_check_minutes)
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_seconds)
    }
}
