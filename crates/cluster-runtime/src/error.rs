//! Lifecycle errors

use crds::ClusterPhase;
use infra_driver::{BatchError, DriverError};
use thiserror::Error;

use crate::bootstrap_token::TokenParseError;

/// Errors returned by lifecycle operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid manifest or arguments. Fatal, detected before any remote call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more hosts failed a lifecycle step
    #[error("{step} failed: {source}")]
    Remote {
        /// Lifecycle step name
        step: &'static str,
        #[source]
        source: BatchError,
    },

    /// Single-host remote failure outside a batch
    #[error("{step} failed: {source}")]
    Driver {
        /// Lifecycle step name
        step: &'static str,
        #[source]
        source: DriverError,
    },

    /// kubeadm output no longer matches the expected wording
    #[error("Bootstrap token protocol error: {0}")]
    Protocol(#[from] TokenParseError),

    /// Operator declined a destructive action
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Operation not supported by this runtime
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Install called on a running cluster
    #[error("cluster is already initialized (phase {0})")]
    AlreadyInitialized(ClusterPhase),

    /// Operation not allowed in the current phase
    #[error("{operation} is not allowed while the cluster is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: ClusterPhase,
    },

    /// Manifest template rendering failed
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Certificate or kubeconfig generation failed
    #[error("Certificate generation failed: {0}")]
    Cert(String),

    /// Persisting or loading cluster state failed
    #[error("State error: {0}")]
    State(String),

    /// Kubernetes API error during verification
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Local IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub(crate) fn remote(step: &'static str) -> impl FnOnce(BatchError) -> Self {
        move |source| Self::Remote { step, source }
    }

    pub(crate) fn driver(step: &'static str) -> impl FnOnce(DriverError) -> Self {
        move |source| match source {
            DriverError::InvalidConfig(msg) => Self::Config(msg),
            source => Self::Driver { step, source },
        }
    }

    /// Whether re-invoking the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. } | Self::Driver { .. } | Self::Kube(_) | Self::Io(_) | Self::State(_)
        )
    }

    /// Hosts named by the error, if any
    pub fn failed_hosts(&self) -> Vec<std::net::IpAddr> {
        match self {
            Self::Remote { source, .. } => source.failed_hosts(),
            Self::Driver { source, .. } => source.host().into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<DriverError> for RuntimeError {
    fn from(err: DriverError) -> Self {
        Self::driver("remote operation")(err)
    }
}
