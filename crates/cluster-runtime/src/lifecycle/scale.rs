//! ScaleUp and ScaleDown

use std::net::IpAddr;

use crds::{ClusterPhase, Role, SshSpec};
use infra_driver::InfraDriver;
use infra_driver::shellcommand::unset_host_alias;
use tracing::{info, warn};

use super::{ClusterRuntime, primary_of};
use crate::error::RuntimeError;
use crate::kubeadm::{RESET_COMMAND, delete_node_command};

impl ClusterRuntime {
    /// Join new masters, then new workers, against a freshly issued token.
    ///
    /// Joining an address that already holds the role is a configuration
    /// error raised before any remote call. The inventory is committed only
    /// when every host joined.
    pub async fn scale_up(&mut self, masters: &[IpAddr], workers: &[IpAddr]) -> Result<(), RuntimeError> {
        const OPERATION: &str = "scale-up";
        self.require_ready(OPERATION)?;
        if masters.is_empty() && workers.is_empty() {
            return Ok(());
        }

        let ssh = SshSpec::default();
        let staged = self
            .driver
            .inventory()
            .with_hosts(Role::Master, masters, &ssh)
            .and_then(|inventory| inventory.with_hosts(Role::Worker, workers, &ssh))
            .map_err(RuntimeError::driver(OPERATION))?;
        let staged = self.driver.staged(staged);

        self.transition(ClusterPhase::Scaling, OPERATION).await?;
        match self.run_scale_up(&staged, masters, workers).await {
            Ok(()) => {
                self.driver = staged;
                self.transition(ClusterPhase::Ready, OPERATION).await
            }
            Err(e) => {
                self.record_failure(ClusterPhase::Ready, OPERATION, &e).await;
                Err(e)
            }
        }
    }

    async fn run_scale_up(
        &self,
        staged: &InfraDriver,
        masters: &[IpAddr],
        workers: &[IpAddr],
    ) -> Result<(), RuntimeError> {
        let current = self.driver.inventory();
        let mut new_hosts: Vec<IpAddr> = Vec::new();
        for host in masters.iter().chain(workers) {
            if !current.contains(*host) && !new_hosts.contains(host) {
                new_hosts.push(*host);
            }
        }
        info!(
            "Scaling up: masters {:?}, workers {:?} ({} new host(s))",
            masters,
            workers,
            new_hosts.len()
        );
        self.prepare_hosts(staged, &new_hosts).await?;

        let primary = primary_of(staged.inventory())?;
        // tokens expire, so each scale-up asks master-zero for new ones
        let token = self.fresh_token(staged, primary).await?;

        let all_masters = staged.inventory().masters().to_vec();
        self.join_masters(staged, masters, primary, &token).await?;
        self.join_workers(staged, workers, &all_masters, &token).await?;

        if !masters.is_empty() {
            let existing: Vec<IpAddr> = staged
                .inventory()
                .workers()
                .iter()
                .copied()
                .filter(|w| !workers.contains(w))
                .collect();
            self.refresh_load_balancers(staged, &existing, &all_masters).await?;
        }
        self.run_launch_commands(staged, primary).await
    }

    /// Remove workers, then masters, after confirmation.
    ///
    /// Leaving no master is a configuration error raised before the prompt
    /// and before any remote call.
    pub async fn scale_down(&mut self, masters: &[IpAddr], workers: &[IpAddr]) -> Result<(), RuntimeError> {
        const OPERATION: &str = "scale-down";
        self.require_ready(OPERATION)?;
        if masters.is_empty() && workers.is_empty() {
            return Ok(());
        }

        let staged = self
            .driver
            .inventory()
            .without_hosts(Role::Worker, workers)
            .and_then(|inventory| inventory.without_hosts(Role::Master, masters))
            .map_err(RuntimeError::driver(OPERATION))?;
        let staged = self.driver.staged(staged);

        let targets: Vec<IpAddr> = workers.iter().chain(masters).copied().collect();
        if !self.confirmer.confirm(OPERATION, &targets).await? {
            return Err(RuntimeError::Aborted(format!("{OPERATION} of {targets:?} declined")));
        }

        self.transition(ClusterPhase::Scaling, OPERATION).await?;
        match self.run_scale_down(&staged, masters, workers).await {
            Ok(()) => {
                self.driver = staged;
                self.transition(ClusterPhase::Ready, OPERATION).await
            }
            Err(e) => {
                self.record_failure(ClusterPhase::Ready, OPERATION, &e).await;
                Err(e)
            }
        }
    }

    async fn run_scale_down(
        &self,
        staged: &InfraDriver,
        masters: &[IpAddr],
        workers: &[IpAddr],
    ) -> Result<(), RuntimeError> {
        let control = primary_of(staged.inventory())?;
        info!("Scaling down: workers {:?}, then masters {:?}", workers, masters);

        self.remove_nodes(staged, workers, control, "remove workers").await?;
        self.remove_nodes(staged, masters, control, "remove masters").await?;

        if !masters.is_empty() {
            self.refresh_load_balancers(staged, staged.inventory().workers(), staged.inventory().masters())
                .await?;
        }
        Ok(())
    }

    /// Reset and clean every host in `hosts` and delete its node through
    /// `control`. Hosts that keep another role are left running.
    async fn remove_nodes(
        &self,
        staged: &InfraDriver,
        hosts: &[IpAddr],
        control: IpAddr,
        step: &'static str,
    ) -> Result<(), RuntimeError> {
        let (kept, removed): (Vec<IpAddr>, Vec<IpAddr>) =
            hosts.iter().copied().partition(|h| staged.inventory().contains(*h));
        if !kept.is_empty() {
            warn!("Hosts {:?} keep another role and are not reset", kept);
        }
        if removed.is_empty() {
            return Ok(());
        }

        let driver = &self.driver;
        let domain = self.kubeadm.api_server_domain.as_str();
        driver
            .execute(&removed, |host| async move {
                let node_name = driver.hostname(host).await?;
                driver.cmd(host, RESET_COMMAND).await?;
                driver
                    .cmd(host, &self.distributor.clean_command(driver, host))
                    .await?;
                driver.cmd(host, &unset_host_alias(domain)).await?;
                staged.cmd(control, &delete_node_command(&node_name)).await?;
                info!("[{}] removed node {}", host, node_name);
                Ok(())
            })
            .await
            .map_err(RuntimeError::remote(step))?;
        driver
            .remove_host_aliases(&removed)
            .await
            .map_err(RuntimeError::remote("remove host aliases"))
    }
}
