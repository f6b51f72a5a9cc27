//! Controller-specific error types.

use thiserror::Error;

/// Errors raised by the CLI before the lifecycle engine takes over
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Unparseable address in a host list
    #[error("Invalid IP address: {0:?}")]
    InvalidAddress(String),

    /// Range whose end precedes its start, or whose ends differ in family
    #[error("Invalid IP range: {0:?}")]
    InvalidRange(String),

    /// Range expanding to more hosts than one command accepts
    #[error("IP range {range:?} spans more than {max} addresses")]
    RangeTooLarge { range: String, max: u128 },

    /// Clusterfile without `metadata.name`
    #[error("Clusterfile {0} has no metadata.name")]
    UnnamedCluster(String),
}
