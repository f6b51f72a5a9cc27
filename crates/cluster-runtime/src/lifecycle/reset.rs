//! Reset: tear down workers, then masters

use std::net::IpAddr;

use crds::ClusterPhase;
use infra_driver::shellcommand::unset_host_alias;
use tracing::info;

use super::{ClusterRuntime, workers_only};
use crate::error::RuntimeError;
use crate::kubeadm::RESET_COMMAND;

const OPERATION: &str = "reset";

impl ClusterRuntime {
    /// Tear the cluster down after confirmation. The inventory is kept so
    /// the same manifest can be installed again.
    pub async fn reset(&mut self) -> Result<(), RuntimeError> {
        let phase = self.phase();
        if matches!(phase, ClusterPhase::Uninitialized | ClusterPhase::Reset) {
            return Err(RuntimeError::InvalidPhase {
                operation: OPERATION,
                phase,
            });
        }

        let hosts = self.driver.inventory().hosts().to_vec();
        if !self.confirmer.confirm(OPERATION, &hosts).await? {
            return Err(RuntimeError::Aborted(format!("{OPERATION} of {hosts:?} declined")));
        }

        self.transition(ClusterPhase::Resetting, OPERATION).await?;
        match self.run_reset().await {
            Ok(()) => {
                self.status_mut().kubernetes_version = None;
                self.transition(ClusterPhase::Reset, OPERATION).await
            }
            Err(e) => {
                self.record_failure(ClusterPhase::Resetting, OPERATION, &e).await;
                Err(e)
            }
        }
    }

    async fn run_reset(&self) -> Result<(), RuntimeError> {
        let inventory = self.driver.inventory();
        let masters = inventory.masters();
        let workers = workers_only(inventory.workers(), masters);

        self.reset_hosts(&workers, "reset workers").await?;
        self.reset_hosts(masters, "reset masters").await
    }

    /// Undo kubeadm, the rootfs and the host aliases on `hosts` concurrently
    async fn reset_hosts(&self, hosts: &[IpAddr], step: &'static str) -> Result<(), RuntimeError> {
        if hosts.is_empty() {
            return Ok(());
        }
        info!("Resetting {:?}", hosts);
        let driver = &self.driver;
        let unset_domain = &unset_host_alias(&self.kubeadm.api_server_domain);
        driver
            .execute(hosts, |host| async move {
                driver
                    .cmds(
                        host,
                        &[
                            RESET_COMMAND.to_string(),
                            self.distributor.clean_command(driver, host),
                            unset_domain.clone(),
                        ],
                    )
                    .await
            })
            .await
            .map_err(RuntimeError::remote(step))?;
        driver
            .remove_host_aliases(hosts)
            .await
            .map_err(RuntimeError::remote("remove host aliases"))
    }
}
