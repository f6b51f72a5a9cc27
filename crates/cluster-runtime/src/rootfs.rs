//! Rootfs Distributor
//!
//! Moves an already materialized package tree to every target host and runs
//! its init script there. Mounting the image layers into that tree is the
//! job of a [`RootfsProvider`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use infra_driver::env::render_exports;
use infra_driver::shellcommand::shell_quote;
use infra_driver::{BatchReport, DriverError, HostOutcome, InfraDriver};
use tracing::{info, warn};

use crate::error::RuntimeError;

pub const INIT_SCRIPT: &str = "init.sh";
pub const CLEAN_SCRIPT: &str = "clean.sh";

/// Local package tree ready to be copied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedRootfs {
    pub image: String,
    pub path: PathBuf,
}

/// Turns a cluster image name into a local directory tree
#[async_trait]
pub trait RootfsProvider: Send + Sync {
    async fn mount(&self, image: &str) -> Result<MountedRootfs, RuntimeError>;

    async fn unmount(&self, rootfs: &MountedRootfs) -> Result<(), RuntimeError>;
}

/// Provider for a tree that is already on disk; mount and unmount are no-ops
#[derive(Debug, Clone)]
pub struct LocalRootfs {
    path: PathBuf,
}

impl LocalRootfs {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RootfsProvider for LocalRootfs {
    async fn mount(&self, image: &str) -> Result<MountedRootfs, RuntimeError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Err(RuntimeError::Config(format!(
                "rootfs for {image} not found at {}",
                self.path.display()
            )));
        }
        Ok(MountedRootfs {
            image: image.to_string(),
            path: self.path.clone(),
        })
    }

    async fn unmount(&self, _rootfs: &MountedRootfs) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Copies the rootfs to `remote_root` and prepares it on each host
#[derive(Debug, Clone)]
pub struct RootfsDistributor {
    remote_root: String,
}

impl RootfsDistributor {
    pub fn new(remote_root: impl Into<String>) -> Self {
        Self {
            remote_root: remote_root.into(),
        }
    }

    /// `chmod +x` the packaged scripts and run `init.sh` with the host's env
    pub fn init_command(&self, driver: &InfraDriver, host: IpAddr) -> String {
        let root = shell_quote(&self.remote_root);
        format!(
            "cd {root} && chmod +x scripts/* && cd scripts && {}bash {INIT_SCRIPT}",
            render_exports(&driver.inventory().host_env(host))
        )
    }

    /// Run the packaged `clean.sh` when present, then drop the whole tree
    pub fn clean_command(&self, driver: &InfraDriver, host: IpAddr) -> String {
        let root = shell_quote(&self.remote_root);
        let script = shell_quote(&format!("{}/scripts/{CLEAN_SCRIPT}", self.remote_root));
        format!(
            "if [ -f {script} ]; then cd {root}/scripts && {}bash {CLEAN_SCRIPT}; fi; rm -rf {root}",
            render_exports(&driver.inventory().host_env(host))
        )
    }

    /// Run one launch command of the cluster image from the rootfs directory
    /// with the host's env
    pub fn launch_command(&self, driver: &InfraDriver, host: IpAddr, command: &str) -> String {
        format!(
            "cd {} && {}{command}",
            shell_quote(&self.remote_root),
            render_exports(&driver.inventory().host_env(host))
        )
    }

    /// Copy the tree to one host without running its init script
    pub async fn deliver(&self, driver: &InfraDriver, host: IpAddr, local: &Path) -> Result<(), DriverError> {
        info!("[{}] delivering rootfs {} to {}", host, local.display(), self.remote_root);
        driver.copy(host, local, &self.remote_root).await
    }

    /// Copy then init on every host. A host whose copy failed is not
    /// initialized; every failure of both steps is reported.
    pub async fn distribute(&self, driver: &InfraDriver, hosts: &[IpAddr], local: &Path) -> Result<(), RuntimeError> {
        if hosts.is_empty() {
            return Ok(());
        }
        info!(
            "Distributing rootfs {} to {} host(s) at {}",
            local.display(),
            hosts.len(),
            self.remote_root
        );

        let remote_root = self.remote_root.as_str();
        let copied = driver
            .run_batch(hosts, |host| async move { driver.copy(host, local, remote_root).await })
            .await;
        let ready = copied.succeeded();
        if !copied.is_success() {
            warn!("Rootfs copy failed on {:?}; skipping init there", copied.failed());
        }

        let initialized = driver
            .run_batch(&ready, |host| async move {
                driver.cmd(host, &self.init_command(driver, host)).await.map(|_| ())
            })
            .await;

        merge_reports(copied, initialized)
            .into_result()
            .map_err(RuntimeError::remote("distribute rootfs"))
    }
}

/// One outcome per host: the copy failure if the copy failed, otherwise the
/// init outcome
fn merge_reports(copied: BatchReport, initialized: BatchReport) -> BatchReport {
    let mut init: HashMap<IpAddr, Result<(), DriverError>> = initialized
        .into_outcomes()
        .into_iter()
        .map(|o| (o.host, o.result))
        .collect();
    let outcomes = copied
        .into_outcomes()
        .into_iter()
        .map(|o| HostOutcome {
            host: o.host,
            result: o.result.and_then(|()| init.remove(&o.host).unwrap_or(Ok(()))),
        })
        .collect();
    BatchReport::new(outcomes)
}
