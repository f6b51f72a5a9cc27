//! Mock RemoteShell for unit testing
//!
//! Records every remote call in order and answers from scripted rules, so
//! lifecycle sequencing can be asserted without real hosts.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::DriverError;
use crate::inventory::Endpoint;
use crate::shell_trait::{CommandOutput, RemoteShell};

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Exec { host: IpAddr, command: String },
    Copy { host: IpAddr, local: PathBuf, remote: String },
    Fetch { host: IpAddr, remote: String, local: PathBuf },
}

impl RemoteCall {
    pub fn host(&self) -> IpAddr {
        match self {
            Self::Exec { host, .. } | Self::Copy { host, .. } | Self::Fetch { host, .. } => *host,
        }
    }
}

struct Rule {
    host: Option<IpAddr>,
    pattern: String,
    output: CommandOutput,
}

#[derive(Default)]
struct MockState {
    calls: Vec<RemoteCall>,
    rules: Vec<Rule>,
    down_hosts: HashMap<IpAddr, String>,
    hung_hosts: HashSet<IpAddr>,
    failed_copies: HashSet<IpAddr>,
    remote_files: HashMap<String, String>,
    hostnames: HashMap<IpAddr, String>,
}

/// Mock transport for testing
///
/// Commands without a matching rule succeed with empty output, except
/// `hostname` which answers `node-<addr>`.
#[derive(Clone, Default)]
pub struct MockShell {
    state: Arc<Mutex<MockState>>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add_rule(&self, host: Option<IpAddr>, pattern: &str, output: CommandOutput) {
        self.state().rules.push(Rule {
            host,
            pattern: pattern.to_string(),
            output,
        });
    }

    /// Answer commands containing `pattern` on any host with `stdout`
    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.add_rule(None, pattern, CommandOutput::ok(stdout));
    }

    /// Answer commands containing `pattern` on `host` with `stdout`
    pub fn respond_on(&self, host: IpAddr, pattern: &str, stdout: &str) {
        self.add_rule(Some(host), pattern, CommandOutput::ok(stdout));
    }

    /// Commands containing `pattern` on `host` exit 1 with `stderr`
    pub fn fail_on(&self, host: IpAddr, pattern: &str, stderr: &str) {
        self.add_rule(
            Some(host),
            pattern,
            CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Every exec on `host` fails as an ssh connection error would
    pub fn host_down(&self, host: IpAddr, message: &str) {
        self.state().down_hosts.insert(host, message.to_string());
    }

    /// Every call on `host` never completes
    pub fn hang_host(&self, host: IpAddr) {
        self.state().hung_hosts.insert(host);
    }

    /// Copies to `host` fail
    pub fn fail_copy(&self, host: IpAddr) {
        self.state().failed_copies.insert(host);
    }

    /// Contents returned when `remote` is fetched from any host
    pub fn remote_file(&self, remote: &str, contents: &str) {
        self.state()
            .remote_files
            .insert(remote.to_string(), contents.to_string());
    }

    pub fn set_hostname(&self, host: IpAddr, hostname: &str) {
        self.state().hostnames.insert(host, hostname.to_string());
    }

    /// Every call, in the order it was issued
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Commands executed on `host`, in order
    pub fn commands_on(&self, host: IpAddr) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                RemoteCall::Exec { host: h, command } if *h == host => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first exec on `host` containing `needle`
    pub fn position(&self, host: IpAddr, needle: &str) -> Option<usize> {
        self.state().calls.iter().position(|c| {
            matches!(c, RemoteCall::Exec { host: h, command } if *h == host && command.contains(needle))
        })
    }

    /// Hosts that ran a command containing `needle`
    pub fn hosts_running(&self, needle: &str) -> Vec<IpAddr> {
        let mut hosts: Vec<IpAddr> = Vec::new();
        for call in &self.state().calls {
            if let RemoteCall::Exec { host, command } = call
                && command.contains(needle)
                && !hosts.contains(host)
            {
                hosts.push(*host);
            }
        }
        hosts
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn is_hung(&self, host: IpAddr) -> bool {
        self.state().hung_hosts.contains(&host)
    }
}

fn default_hostname(host: IpAddr) -> String {
    format!("node-{}", host.to_string().replace(['.', ':'], "-"))
}

#[async_trait::async_trait]
impl RemoteShell for MockShell {
    async fn exec(&self, endpoint: &Endpoint, command: &str) -> Result<CommandOutput, DriverError> {
        let host = endpoint.addr;
        let output = {
            let mut state = self.state();
            state.calls.push(RemoteCall::Exec {
                host,
                command: command.to_string(),
            });
            if let Some(message) = state.down_hosts.get(&host) {
                CommandOutput {
                    code: Some(255),
                    stdout: String::new(),
                    stderr: message.clone(),
                }
            } else if let Some(rule) = state
                .rules
                .iter()
                .rev()
                .find(|r| r.host.is_none_or(|h| h == host) && command.contains(&r.pattern))
            {
                rule.output.clone()
            } else if command.trim() == "hostname" {
                CommandOutput::ok(
                    state
                        .hostnames
                        .get(&host)
                        .cloned()
                        .unwrap_or_else(|| default_hostname(host)),
                )
            } else {
                CommandOutput::ok("")
            }
        };

        if self.is_hung(host) {
            return std::future::pending().await;
        }
        Ok(output)
    }

    async fn copy(&self, endpoint: &Endpoint, local: &Path, remote: &str) -> Result<(), DriverError> {
        let host = endpoint.addr;
        let failed = {
            let mut state = self.state();
            state.calls.push(RemoteCall::Copy {
                host,
                local: local.to_path_buf(),
                remote: remote.to_string(),
            });
            state.failed_copies.contains(&host) || state.down_hosts.contains_key(&host)
        };

        if self.is_hung(host) {
            return std::future::pending().await;
        }
        if failed {
            return Err(DriverError::CopyFailed {
                host,
                local: local.to_path_buf(),
                remote: remote.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(&self, endpoint: &Endpoint, remote: &str, local: &Path) -> Result<(), DriverError> {
        let host = endpoint.addr;
        let contents = {
            let mut state = self.state();
            state.calls.push(RemoteCall::Fetch {
                host,
                remote: remote.to_string(),
                local: local.to_path_buf(),
            });
            state.remote_files.get(remote).cloned()
        };

        if self.is_hung(host) {
            return std::future::pending().await;
        }
        let Some(contents) = contents else {
            return Err(DriverError::FetchFailed {
                host,
                remote: remote.to_string(),
                local: local.to_path_buf(),
                reason: "No such file or directory".to_string(),
            });
        };
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, contents).await?;
        Ok(())
    }
}
