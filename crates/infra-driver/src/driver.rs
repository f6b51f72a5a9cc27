//! Host Execution Driver
//!
//! Single-host and batched remote operations over a [`RemoteShell`]. Every
//! command is bounded by a timeout. A batch runs one task per host, waits for
//! all of them and reports every failure; a failing or hung host never
//! cancels its siblings.

use std::future::Future;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backoff::FibonacciBackoff;
use crate::batch::{BatchReport, HostOutcome};
use crate::error::{BatchError, DriverError};
use crate::inventory::{Endpoint, HostInventory};
use crate::shellcommand;
use crate::shell_trait::{CommandOutput, RemoteShell};

/// Bound for copies and fetches, which move whole package trees
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote execution against the hosts of one inventory
#[derive(Clone)]
pub struct InfraDriver {
    inventory: HostInventory,
    shell: Arc<dyn RemoteShell>,
    command_timeout: Duration,
}

impl InfraDriver {
    /// Driver bounding every command by `command_timeout` and every transfer
    /// by [`TRANSFER_TIMEOUT`]
    pub fn new(inventory: HostInventory, shell: Arc<dyn RemoteShell>, command_timeout: Duration) -> Self {
        Self {
            inventory,
            shell,
            command_timeout,
        }
    }

    /// Hosts this driver may touch
    pub fn inventory(&self) -> &HostInventory {
        &self.inventory
    }

    /// Driver over a candidate inventory sharing this driver's transport
    pub fn staged(&self, inventory: HostInventory) -> Self {
        Self {
            inventory,
            ..self.clone()
        }
    }

    /// Bound applied by [`cmd`](Self::cmd)
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    fn endpoint(&self, host: IpAddr) -> Result<Endpoint, DriverError> {
        self.inventory
            .endpoint(host)
            .ok_or(DriverError::HostNotManaged(host))
    }

    async fn exec_raw(&self, host: IpAddr, command: &str, limit: Duration) -> Result<CommandOutput, DriverError> {
        let endpoint = self.endpoint(host)?;
        match timeout(limit, self.shell.exec(&endpoint, command)).await {
            Ok(output) => output,
            Err(_) => Err(DriverError::Timeout { host, after: limit }),
        }
    }

    /// Run `command` on `host`, returning stdout
    pub async fn cmd(&self, host: IpAddr, command: &str) -> Result<String, DriverError> {
        self.cmd_with_timeout(host, command, self.command_timeout).await
    }

    /// Run `command` on `host` under `limit` instead of the driver's command timeout
    pub async fn cmd_with_timeout(&self, host: IpAddr, command: &str, limit: Duration) -> Result<String, DriverError> {
        debug!("[{}] {}", host, command);
        self.exec_raw(host, command, limit)
            .await?
            .into_result(host, command)
    }

    /// Run `commands` on `host` one after another, stopping at the first failure
    pub async fn cmds(&self, host: IpAddr, commands: &[String]) -> Result<(), DriverError> {
        for command in commands {
            self.cmd(host, command).await?;
        }
        Ok(())
    }

    /// Copy a local file or directory tree to `remote` on `host`
    pub async fn copy(&self, host: IpAddr, local: &Path, remote: &str) -> Result<(), DriverError> {
        let endpoint = self.endpoint(host)?;
        debug!("[{}] copy {} -> {}", host, local.display(), remote);
        match timeout(TRANSFER_TIMEOUT, self.shell.copy(&endpoint, local, remote)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout {
                host,
                after: TRANSFER_TIMEOUT,
            }),
        }
    }

    /// Copy `remote` on `host` to `local`, creating parent directories
    pub async fn fetch(&self, host: IpAddr, remote: &str, local: &Path) -> Result<(), DriverError> {
        let endpoint = self.endpoint(host)?;
        debug!("[{}] fetch {} -> {}", host, remote, local.display());
        match timeout(TRANSFER_TIMEOUT, self.shell.fetch(&endpoint, remote, local)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout {
                host,
                after: TRANSFER_TIMEOUT,
            }),
        }
    }

    /// Lowercased hostname of `host`
    pub async fn hostname(&self, host: IpAddr) -> Result<String, DriverError> {
        Ok(self.cmd(host, "hostname").await?.trim().to_lowercase())
    }

    /// Point `hostname` at `ip` in /etc/hosts on `host`, replacing any earlier entry
    pub async fn set_host_alias(&self, host: IpAddr, hostname: &str, ip: &str) -> Result<(), DriverError> {
        self.cmd(host, &shellcommand::set_host_alias(hostname, ip)).await.map(|_| ())
    }

    /// Write the manifest's host aliases to /etc/hosts on every target
    pub async fn apply_host_aliases(&self, hosts: &[IpAddr]) -> Result<(), BatchError> {
        let commands: Vec<String> = self
            .inventory
            .host_aliases()
            .iter()
            .flat_map(|alias| {
                alias
                    .hostnames
                    .iter()
                    .map(move |name| shellcommand::set_host_alias(name, &alias.ip))
            })
            .collect();
        if commands.is_empty() {
            return Ok(());
        }
        let commands = &commands;
        self.execute(hosts, |host| async move { self.cmds(host, commands).await })
            .await
    }

    /// Remove the manifest's host aliases from every target
    pub async fn remove_host_aliases(&self, hosts: &[IpAddr]) -> Result<(), BatchError> {
        let commands: Vec<String> = self
            .inventory
            .host_aliases()
            .iter()
            .flat_map(|alias| alias.hostnames.iter().map(|name| shellcommand::unset_host_alias(name)))
            .collect();
        if commands.is_empty() {
            return Ok(());
        }
        let commands = &commands;
        self.execute(hosts, |host| async move { self.cmds(host, commands).await })
            .await
    }

    /// Run `task` for every host concurrently and collect every outcome.
    ///
    /// Hosts outside the inventory fail with [`DriverError::HostNotManaged`]
    /// without `task` being called for them.
    pub async fn run_batch<F, Fut>(&self, hosts: &[IpAddr], task: F) -> BatchReport
    where
        F: Fn(IpAddr) -> Fut,
        Fut: Future<Output = Result<(), DriverError>>,
    {
        let task = &task;
        let outcomes = join_all(hosts.iter().map(|&host| async move {
            let result = if self.inventory.contains(host) {
                task(host).await
            } else {
                Err(DriverError::HostNotManaged(host))
            };
            if let Err(e) = &result {
                warn!("[{}] {}", host, e);
            }
            HostOutcome { host, result }
        }))
        .await;
        BatchReport::new(outcomes)
    }

    /// [`run_batch`](Self::run_batch) folded into one aggregate result
    pub async fn execute<F, Fut>(&self, hosts: &[IpAddr], task: F) -> Result<(), BatchError>
    where
        F: Fn(IpAddr) -> Fut,
        Fut: Future<Output = Result<(), DriverError>>,
    {
        self.run_batch(hosts, task).await.into_result()
    }

    /// Run `command` on every host concurrently
    pub async fn batch_cmd(&self, hosts: &[IpAddr], command: &str) -> Result<(), BatchError> {
        self.execute(hosts, |host| async move { self.cmd(host, command).await.map(|_| ()) })
            .await
    }

    /// Wait until every host answers over SSH, probing with Fibonacci backoff
    /// until `deadline` elapses
    pub async fn wait_ready(&self, hosts: &[IpAddr], deadline: Duration) -> Result<(), BatchError> {
        info!("Waiting for {} host(s) to accept ssh", hosts.len());
        self.execute(hosts, |host| async move { self.wait_host_ready(host, deadline).await })
            .await
    }

    async fn wait_host_ready(&self, host: IpAddr, deadline: Duration) -> Result<(), DriverError> {
        let started = Instant::now();
        let mut backoff = FibonacciBackoff::default();
        let probe_timeout = PROBE_TIMEOUT.min(self.command_timeout);
        loop {
            match self.cmd_with_timeout(host, "true", probe_timeout).await {
                Ok(_) => return Ok(()),
                Err(e @ DriverError::HostNotManaged(_)) => return Err(e),
                Err(e) => {
                    let delay = backoff.next_backoff();
                    if started.elapsed() + delay > deadline {
                        return Err(DriverError::Unreachable {
                            host,
                            after: deadline,
                            last_error: e.to_string(),
                        });
                    }
                    debug!("[{}] not reachable yet, retrying in {:?}: {}", host, delay, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockShell, RemoteCall};
    use crds::{ClusterSpec, HostAlias, HostSpec, Role, SshSpec};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn inventory() -> HostInventory {
        HostInventory::from_cluster(&ClusterSpec {
            image: "kubernetes:v1.22.15".to_string(),
            env: Vec::new(),
            cmd: Vec::new(),
            ssh: SshSpec {
                passwd: Some("secret".to_string()),
                ..SshSpec::default()
            },
            hosts: vec![
                HostSpec {
                    ips: vec!["10.0.0.1".to_string()],
                    roles: vec![Role::Master],
                    ..HostSpec::default()
                },
                HostSpec {
                    ips: vec!["10.0.0.11".to_string(), "10.0.0.12".to_string()],
                    roles: vec![Role::Worker],
                    ..HostSpec::default()
                },
            ],
            registry: Default::default(),
            host_aliases: vec![HostAlias {
                ip: "10.0.0.100".to_string(),
                hostnames: vec!["mirror.local".to_string()],
            }],
            kubernetes: Default::default(),
        })
        .unwrap()
    }

    fn driver(shell: &MockShell, command_timeout: Duration) -> InfraDriver {
        InfraDriver::new(inventory(), Arc::new(shell.clone()), command_timeout)
    }

    #[tokio::test]
    async fn test_unknown_host_fails_without_network_call() {
        let shell = MockShell::new();
        let driver = driver(&shell, Duration::from_secs(5));

        let err = driver.cmd(ip("192.168.9.9"), "uptime").await.unwrap_err();
        assert!(matches!(err, DriverError::HostNotManaged(h) if h == ip("192.168.9.9")));
        let err = driver
            .copy(ip("192.168.9.9"), Path::new("/tmp/x"), "/tmp/x")
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::HostNotManaged(_)));
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_reports_every_failed_host_and_runs_all() {
        let shell = MockShell::new();
        shell.fail_on(ip("10.0.0.11"), "systemctl", "unit not found");
        shell.fail_on(ip("10.0.0.12"), "systemctl", "unit not found");
        let driver = driver(&shell, Duration::from_secs(5));
        let hosts = driver.inventory().hosts().to_vec();

        let err = driver.batch_cmd(&hosts, "systemctl restart kubelet").await.unwrap_err();

        assert_eq!(err.failed_hosts(), vec![ip("10.0.0.11"), ip("10.0.0.12")]);
        assert!(err.to_string().contains("unit not found"));
        assert_eq!(shell.hosts_running("systemctl").len(), 3);
    }

    #[tokio::test]
    async fn test_batch_with_unmanaged_host_still_runs_the_rest() {
        let shell = MockShell::new();
        let driver = &driver(&shell, Duration::from_secs(5));

        let report = driver
            .run_batch(&[ip("10.0.0.1"), ip("172.16.0.1")], |host| async move {
                driver.cmd(host, "uptime").await.map(|_| ())
            })
            .await;

        assert_eq!(report.succeeded(), vec![ip("10.0.0.1")]);
        assert_eq!(report.failed(), vec![ip("172.16.0.1")]);
        assert_eq!(shell.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_hung_host_times_out_without_cancelling_siblings() {
        let shell = MockShell::new();
        shell.hang_host(ip("10.0.0.12"));
        let driver = &driver(&shell, Duration::from_millis(50));
        let hosts = driver.inventory().hosts().to_vec();

        let report = driver
            .run_batch(&hosts, |host| async move {
                driver.cmd(host, "kubeadm version").await.map(|_| ())
            })
            .await;

        assert_eq!(report.succeeded(), vec![ip("10.0.0.1"), ip("10.0.0.11")]);
        assert_eq!(report.failed(), vec![ip("10.0.0.12")]);
        let hung = report
            .outcomes()
            .iter()
            .find(|o| o.host == ip("10.0.0.12"))
            .unwrap();
        assert!(matches!(hung.result, Err(DriverError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cmds_stop_at_first_failure() {
        let shell = MockShell::new();
        shell.fail_on(ip("10.0.0.1"), "step-2", "boom");
        let driver = driver(&shell, Duration::from_secs(5));

        let commands = vec!["step-1".to_string(), "step-2".to_string(), "step-3".to_string()];
        let err = driver.cmds(ip("10.0.0.1"), &commands).await.unwrap_err();

        assert!(matches!(err, DriverError::CommandFailed { code: Some(1), .. }));
        assert_eq!(shell.commands_on(ip("10.0.0.1")), vec!["step-1", "step-2"]);
    }

    #[tokio::test]
    async fn test_hostname_is_lowercased() {
        let shell = MockShell::new();
        shell.set_hostname(ip("10.0.0.1"), "Master-0\n");
        let driver = driver(&shell, Duration::from_secs(5));

        assert_eq!(driver.hostname(ip("10.0.0.1")).await.unwrap(), "master-0");
    }

    #[tokio::test]
    async fn test_wait_ready_gives_up_after_deadline() {
        let shell = MockShell::new();
        shell.host_down(ip("10.0.0.11"), "ssh: connect to host 10.0.0.11 port 22: No route to host");
        let driver = driver(&shell, Duration::from_secs(5));
        let hosts = driver.inventory().hosts().to_vec();

        let err = driver.wait_ready(&hosts, Duration::ZERO).await.unwrap_err();

        assert_eq!(err.failed_hosts(), vec![ip("10.0.0.11")]);
        assert!(matches!(err.failures()[0].error, DriverError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_apply_host_aliases_runs_everywhere() {
        let shell = MockShell::new();
        let driver = driver(&shell, Duration::from_secs(5));
        let hosts = driver.inventory().hosts().to_vec();

        driver.apply_host_aliases(&hosts).await.unwrap();

        assert_eq!(shell.hosts_running("10.0.0.100 mirror.local").len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_writes_remote_contents() {
        let shell = MockShell::new();
        shell.remote_file("/etc/kubernetes/admin.conf", "apiVersion: v1\n");
        let driver = driver(&shell, Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("kube/config");

        driver
            .fetch(ip("10.0.0.1"), "/etc/kubernetes/admin.conf", &local)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&local).unwrap(), "apiVersion: v1\n");
        assert!(matches!(shell.calls()[0], RemoteCall::Fetch { .. }));
    }
}
