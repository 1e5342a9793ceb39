use thiserror::Error as ThisError;

use crate::config::ConfigError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{kind} #{index} for {component} {target} could not be applied: {message}")]
    Patch {
        component: String,
        target: &'static str,
        kind: &'static str,
        index: usize,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("manifest generation failed: {0}")]
    Generator(String),

    #[error("halyard request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),

    #[error("invalid manifest for {name}: {message}")]
    InvalidManifest { name: String, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn patch(
        component: &str,
        target: &'static str,
        kind: &'static str,
        index: usize,
        message: impl ToString,
    ) -> Self {
        Error::Patch {
            component: component.to_string(),
            target,
            kind,
            index,
            message: message.to_string(),
        }
    }

    pub fn invalid_manifest(name: impl Into<String>, message: impl ToString) -> Self {
        Error::InvalidManifest {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Whether the failure is worth retrying soon (transport, 5xx, conflicts).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(ae)) => ae.code >= 500 || ae.code == 409,
            Error::Kube(_) | Error::Http(_) => true,
            _ => false,
        }
    }
}
