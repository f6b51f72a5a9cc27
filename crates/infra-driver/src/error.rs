//! Driver errors

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by a single remote operation against one host
#[derive(Debug, Error)]
pub enum DriverError {
    /// Host is not part of the inventory; nothing was sent over the network
    #[error("host {0} is not managed by this cluster")]
    HostNotManaged(IpAddr),

    /// Local transport program could not be started
    #[error("failed to launch {program} for host {host}: {source}")]
    Spawn {
        /// Target host
        host: IpAddr,
        /// Program that failed to start
        program: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Remote command exited non-zero
    #[error("command on host {host} exited with {}: {command}: {}", display_code(*.code), stderr.trim())]
    CommandFailed {
        /// Target host
        host: IpAddr,
        /// Command line that was run
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
    },

    /// Local-to-remote copy failed
    #[error("copy {} -> {host}:{remote} failed: {reason}", local.display())]
    CopyFailed {
        /// Target host
        host: IpAddr,
        /// Local source path
        local: PathBuf,
        /// Remote destination path
        remote: String,
        /// Transport message
        reason: String,
    },

    /// Remote-to-local copy failed
    #[error("fetch {host}:{remote} -> {} failed: {reason}", local.display())]
    FetchFailed {
        /// Source host
        host: IpAddr,
        /// Remote source path
        remote: String,
        /// Local destination path
        local: PathBuf,
        /// Transport message
        reason: String,
    },

    /// Operation did not finish within its timeout
    #[error("operation on host {host} timed out after {after:?}")]
    Timeout {
        /// Target host
        host: IpAddr,
        /// Elapsed budget
        after: Duration,
    },

    /// Host never answered within the readiness deadline
    #[error("host {host} not reachable over ssh within {after:?}: {last_error}")]
    Unreachable {
        /// Target host
        host: IpAddr,
        /// Readiness deadline
        after: Duration,
        /// Last probe failure
        last_error: String,
    },

    /// Inventory or credential configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

impl DriverError {
    /// Host the error concerns, when it concerns one
    pub fn host(&self) -> Option<IpAddr> {
        match self {
            Self::HostNotManaged(host)
            | Self::Spawn { host, .. }
            | Self::CommandFailed { host, .. }
            | Self::CopyFailed { host, .. }
            | Self::FetchFailed { host, .. }
            | Self::Timeout { host, .. }
            | Self::Unreachable { host, .. } => Some(*host),
            Self::InvalidConfig(_) | Self::Io(_) => None,
        }
    }
}

/// One failed host inside a batch
#[derive(Debug)]
pub struct HostFailure {
    /// Failed host
    pub host: IpAddr,
    /// Cause
    pub error: DriverError,
}

/// Every per-host failure of one concurrent batch.
///
/// Never empty: a batch where every host succeeded yields `Ok(())` instead.
#[derive(Debug)]
pub struct BatchError {
    failures: Vec<HostFailure>,
    attempted: usize,
}

impl BatchError {
    /// Build from the failures of a batch that targeted `attempted` hosts
    pub fn new(failures: Vec<HostFailure>, attempted: usize) -> Self {
        Self { failures, attempted }
    }

    /// Per-host failures in the order the hosts were given
    pub fn failures(&self) -> &[HostFailure] {
        &self.failures
    }

    /// Addresses of the failed hosts
    pub fn failed_hosts(&self) -> Vec<IpAddr> {
        self.failures.iter().map(|f| f.host).collect()
    }

    /// Number of hosts the batch targeted
    pub fn attempted(&self) -> usize {
        self.attempted
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} hosts failed", self.failures.len(), self.attempted)?;
        for failure in &self.failures {
            write!(f, "; [{}]: {}", failure.host, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}
