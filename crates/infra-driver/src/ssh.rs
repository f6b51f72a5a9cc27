//! OpenSSH-backed transport
//!
//! Shells out to the system `ssh`/`scp` binaries. Password and passphrase
//! authentication go through `sshpass -e` so secrets never appear on a
//! command line.

use std::net::IpAddr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::DriverError;
use crate::inventory::{Endpoint, SshCredentials};
use crate::shellcommand::shell_quote;
use crate::shell_trait::{CommandOutput, RemoteShell};

/// OpenSSH client transport
#[derive(Debug, Clone)]
pub struct SshShell {
    ssh_program: String,
    scp_program: String,
    connect_timeout: Duration,
}

impl Default for SshShell {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SshShell {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..Self::default()
        }
    }

    fn common_options(&self, creds: &SshCredentials) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)));
        if let Some(key) = &creds.private_key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        if creds.password.is_none() && creds.passphrase.is_none() {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args
    }

    /// `program` wrapped in sshpass when a secret has to be typed
    fn command(&self, program: &str, creds: &SshCredentials) -> Command {
        let mut cmd = match (&creds.private_key, &creds.passphrase, &creds.password) {
            (Some(_), Some(passphrase), _) => {
                let mut cmd = Command::new("sshpass");
                cmd.args(["-P", "passphrase", "-e", program]).env("SSHPASS", passphrase);
                cmd
            }
            (_, _, Some(password)) => {
                let mut cmd = Command::new("sshpass");
                cmd.args(["-e", program]).env("SSHPASS", password);
                cmd
            }
            _ => Command::new(program),
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, host: IpAddr, program: &str, mut cmd: Command) -> Result<CommandOutput, DriverError> {
        let output = cmd.output().await.map_err(|source| DriverError::Spawn {
            host,
            program: program.to_string(),
            source,
        })?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn remote_target(endpoint: &Endpoint, path: &str) -> String {
    match endpoint.addr {
        IpAddr::V4(v4) => format!("{}@{v4}:{path}", endpoint.credentials.user),
        IpAddr::V6(v6) => format!("{}@[{v6}]:{path}", endpoint.credentials.user),
    }
}

#[async_trait::async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, endpoint: &Endpoint, command: &str) -> Result<CommandOutput, DriverError> {
        let creds = &endpoint.credentials;
        let mut cmd = self.command(&self.ssh_program, creds);
        cmd.args(self.common_options(creds))
            .arg("-p")
            .arg(creds.port.to_string())
            .arg(format!("{}@{}", creds.user, endpoint.addr))
            .arg(command);
        debug!("ssh {}: {}", endpoint.addr, command);
        self.run(endpoint.addr, &self.ssh_program, cmd).await
    }

    async fn copy(&self, endpoint: &Endpoint, local: &Path, remote: &str) -> Result<(), DriverError> {
        let copy_failed = |reason: String| DriverError::CopyFailed {
            host: endpoint.addr,
            local: local.to_path_buf(),
            remote: remote.to_string(),
            reason,
        };

        // Directory contents land inside `remote`, files land at `remote`
        let (mkdir, source) = if local.is_dir() {
            (remote.to_string(), local.join("."))
        } else {
            let parent = remote.rsplit_once('/').map_or(".", |(d, _)| if d.is_empty() { "/" } else { d });
            (parent.to_string(), local.to_path_buf())
        };
        let prepared = self.exec(endpoint, &format!("mkdir -p {}", shell_quote(&mkdir))).await?;
        if !prepared.success() {
            return Err(copy_failed(prepared.stderr.trim().to_string()));
        }

        let creds = &endpoint.credentials;
        let mut cmd = self.command(&self.scp_program, creds);
        cmd.args(self.common_options(creds))
            .arg("-r")
            .arg("-P")
            .arg(creds.port.to_string())
            .arg(&source)
            .arg(remote_target(endpoint, remote));
        debug!("scp {} -> {}:{}", local.display(), endpoint.addr, remote);
        let output = self.run(endpoint.addr, &self.scp_program, cmd).await?;
        if output.success() {
            Ok(())
        } else {
            Err(copy_failed(output.stderr.trim().to_string()))
        }
    }

    async fn fetch(&self, endpoint: &Endpoint, remote: &str, local: &Path) -> Result<(), DriverError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let creds = &endpoint.credentials;
        let mut cmd = self.command(&self.scp_program, creds);
        cmd.args(self.common_options(creds))
            .arg("-P")
            .arg(creds.port.to_string())
            .arg(remote_target(endpoint, remote))
            .arg(local);
        debug!("scp {}:{} -> {}", endpoint.addr, remote, local.display());
        let output = self.run(endpoint.addr, &self.scp_program, cmd).await?;
        if output.success() {
            Ok(())
        } else {
            Err(DriverError::FetchFailed {
                host: endpoint.addr,
                remote: remote.to_string(),
                local: local.to_path_buf(),
                reason: output.stderr.trim().to_string(),
            })
        }
    }
}
