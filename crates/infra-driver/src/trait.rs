//! RemoteShell trait for mocking
//!
//! The transport primitives (exec, copy, fetch) the driver builds on. `SshShell`
//! implements them with the system OpenSSH client; tests use `MockShell`.

use std::net::IpAddr;
use std::path::Path;

use crate::error::DriverError;
use crate::inventory::Endpoint;

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output carrying `stdout`
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`DriverError::CommandFailed`]
    pub fn into_result(self, host: IpAddr, command: &str) -> Result<String, DriverError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(DriverError::CommandFailed {
                host,
                command: command.to_string(),
                code: self.code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Remote shell transport.
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
/// Implementations must not retry on their own; the driver owns timeouts.
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` through the login shell of `endpoint`. A non-zero exit is
    /// returned as output, not as an error.
    async fn exec(&self, endpoint: &Endpoint, command: &str) -> Result<CommandOutput, DriverError>;

    /// Copy a local file or directory tree to `remote`
    async fn copy(&self, endpoint: &Endpoint, local: &Path, remote: &str) -> Result<(), DriverError>;

    /// Copy the remote file `remote` to `local`
    async fn fetch(&self, endpoint: &Endpoint, remote: &str, local: &Path) -> Result<(), DriverError>;
}
