//! Upgrade: replace binaries tier by tier, one host at a time

use std::net::IpAddr;
use std::path::Path;

use crds::ClusterPhase;
use infra_driver::InfraDriver;
use tracing::{info, warn};

use super::{ClusterRuntime, primary_of, workers_only};
use crate::error::RuntimeError;
use crate::kubeadm::{UPGRADE_NODE_COMMAND, upgrade_apply_command, upgrade_binaries_command};
use crate::version::{InvalidVersion, KubeVersion, is_not_older};

const OPERATION: &str = "upgrade";

impl ClusterRuntime {
    /// Upgrade the running cluster to the manifest's Kubernetes version.
    ///
    /// Order: master-zero, then the other masters, then the workers, one
    /// host at a time within a tier. Each host receives the new rootfs just
    /// before its own upgrade; the init script is not run again. A target older than the running version
    /// is a configuration error; skipping a minor version is unsupported.
    pub async fn upgrade(&mut self) -> Result<(), RuntimeError> {
        self.require_ready(OPERATION)?;
        let target = self.kubeadm.version;
        if let Some(current) = self.cluster.status.as_ref().and_then(|s| s.kubernetes_version.clone()) {
            check_upgrade_path(&current, target)?;
        }

        self.transition(ClusterPhase::Upgrading, OPERATION).await?;
        match self.run_upgrade(target).await {
            Ok(()) => {
                self.status_mut().kubernetes_version = Some(target.to_string());
                self.transition(ClusterPhase::Ready, OPERATION).await
            }
            Err(e) => {
                self.record_failure(ClusterPhase::Ready, OPERATION, &e).await;
                Err(e)
            }
        }
    }

    async fn run_upgrade(&self, target: KubeVersion) -> Result<(), RuntimeError> {
        let driver = &self.driver;
        driver
            .wait_ready(driver.inventory().hosts(), self.config.ssh_ready_timeout)
            .await
            .map_err(RuntimeError::remote("wait for ssh"))?;

        let mounted = self.rootfs.mount(&self.cluster.spec.image).await?;
        let upgraded = self.upgrade_tiers(driver, &mounted.path, target).await;
        if let Err(e) = self.rootfs.unmount(&mounted).await {
            warn!("Failed to unmount rootfs {}: {}", mounted.path.display(), e);
        }
        upgraded
    }

    async fn upgrade_tiers(&self, driver: &InfraDriver, rootfs: &Path, target: KubeVersion) -> Result<(), RuntimeError> {
        let inventory = driver.inventory();
        let primary = primary_of(inventory)?;
        let replace = upgrade_binaries_command(&self.config.remote_rootfs);
        let tiers: [(&str, Vec<IpAddr>, String); 3] = [
            ("master-zero", vec![primary], upgrade_apply_command(&target)),
            ("masters", inventory.secondary_masters(), UPGRADE_NODE_COMMAND.to_string()),
            ("workers", workers_only(inventory.workers(), inventory.masters()), UPGRADE_NODE_COMMAND.to_string()),
        ];
        for (tier, hosts, upgrade) in &tiers {
            for host in hosts {
                info!("[{}] upgrading {} to {}", host, tier, target);
                self.distributor
                    .deliver(driver, *host, rootfs)
                    .await
                    .map_err(RuntimeError::driver("deliver rootfs"))?;
                driver
                    .cmds(*host, &[replace.clone(), upgrade.clone()])
                    .await
                    .map_err(RuntimeError::driver("upgrade"))?;
            }
        }
        Ok(())
    }
}

fn check_upgrade_path(current: &str, target: KubeVersion) -> Result<(), RuntimeError> {
    if !is_not_older(&target.to_string(), current) {
        return Err(RuntimeError::Config(format!(
            "cannot upgrade from {current:?} to {target}"
        )));
    }
    let current: KubeVersion = current
        .parse()
        .map_err(|e: InvalidVersion| RuntimeError::State(e.to_string()))?;
    // not older than current, so within one major the minor cannot go down
    if target.major != current.major || target.minor.saturating_sub(current.minor) > 1 {
        return Err(RuntimeError::Unsupported(format!(
            "upgrade from {current} to {target} skips a minor version"
        )));
    }
    Ok(())
}
