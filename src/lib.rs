//! Kubernetes operator keeping Spinnaker installations in sync with
//! `SpinnakerService` resources.

pub mod bundle;
pub mod changedetector;
pub mod cluster;
pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod generator;
pub mod persist;
pub mod reconcile;
pub mod settings;
pub mod status;
pub mod strategic;
pub mod transformer;

pub use error::{Error, Result};
