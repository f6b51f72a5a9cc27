//! Joining masters and workers with a shared bootstrap token

use std::collections::BTreeMap;
use std::net::IpAddr;

use infra_driver::shellcommand::{set_host_alias, write_file};
use infra_driver::{DriverError, InfraDriver, ManagedHost};
use tracing::info;

use super::{ClusterRuntime, workers_only};
use crate::bootstrap_token::BootstrapToken;
use crate::error::RuntimeError;
use crate::kubeadm::{
    COPY_ADMIN_KUBECONFIG_COMMAND, JOIN_MASTER_KUBECONFIGS, KUBEADM_JOIN_CONFIG_PATH, KUBERNETES_DIR,
    ROUTE_OK, route_add_command, route_check_command,
};
use crate::lvscare;

impl ClusterRuntime {
    /// Join config of every host, rendered before any of them is touched
    fn render_join_configs<F>(
        &self,
        driver: &InfraDriver,
        hosts: &[IpAddr],
        render: F,
    ) -> Result<BTreeMap<IpAddr, String>, RuntimeError>
    where
        F: Fn(&ManagedHost) -> Result<String, RuntimeError>,
    {
        hosts
            .iter()
            .map(|addr| {
                let host = driver
                    .inventory()
                    .get(*addr)
                    .ok_or_else(|| RuntimeError::Config(format!("host {addr} is not in the inventory")))?;
                Ok((*addr, render(host)?))
            })
            .collect()
    }

    /// Join `masters` concurrently as control-plane nodes through `primary`
    pub(super) async fn join_masters(
        &self,
        driver: &InfraDriver,
        masters: &[IpAddr],
        primary: IpAddr,
        token: &BootstrapToken,
    ) -> Result<(), RuntimeError> {
        if masters.is_empty() {
            return Ok(());
        }
        info!("Joining {} master(s): {:?}", masters.len(), masters);

        let configs = self.render_join_configs(driver, masters, |host| {
            self.kubeadm.render_master_join(host, token)
        })?;
        let configs = &configs;
        let kubeconfig_dir = &self.config.kubeconfig_dir();
        let static_files = &self.static_file_commands();
        let domain = self.kubeadm.api_server_domain.as_str();
        let join_command = &self.kubeadm.join_command();

        driver
            .execute(masters, |host| async move {
                let config = configs.get(&host).ok_or(DriverError::HostNotManaged(host))?;
                info!("[{}] joining as master", host);
                for name in JOIN_MASTER_KUBECONFIGS {
                    driver
                        .copy(host, &kubeconfig_dir.join(name), &format!("{KUBERNETES_DIR}/{name}"))
                        .await?;
                }
                driver.cmds(host, static_files).await?;
                driver
                    .cmds(
                        host,
                        &[
                            set_host_alias(domain, &primary.to_string()),
                            write_file(KUBEADM_JOIN_CONFIG_PATH, config),
                            join_command.clone(),
                            // a joined master serves the API itself
                            set_host_alias(domain, &host.to_string()),
                            COPY_ADMIN_KUBECONFIG_COMMAND.to_string(),
                        ],
                    )
                    .await?;
                info!("[{}] joined as master", host);
                Ok(())
            })
            .await
            .map_err(RuntimeError::remote("join masters"))
    }

    /// Join `workers` concurrently through the VIP, each with a load
    /// balancer over `masters`. Workers that are also masters joined as
    /// masters and are skipped.
    pub(super) async fn join_workers(
        &self,
        driver: &InfraDriver,
        workers: &[IpAddr],
        masters: &[IpAddr],
        token: &BootstrapToken,
    ) -> Result<(), RuntimeError> {
        let workers = &workers_only(workers, masters);
        if workers.is_empty() {
            return Ok(());
        }
        info!("Joining {} worker(s): {:?}", workers.len(), workers);

        let configs = self.render_join_configs(driver, workers, |host| {
            self.kubeadm.render_worker_join(host, token)
        })?;
        let configs = &configs;
        let lb = self.load_balancer(masters);
        let ipvs_command = &lb.ipvs_command();
        let install_lvscare = &lb.install_command()?;
        let alias = &set_host_alias(&self.kubeadm.api_server_domain, &self.kubeadm.vip.to_string());
        let join_command = &self.kubeadm.join_command();
        let vip = self.kubeadm.vip;

        driver
            .execute(workers, |host| async move {
                let config = configs.get(&host).ok_or(DriverError::HostNotManaged(host))?;
                info!("[{}] joining as worker", host);

                let route = driver.cmd(host, &route_check_command(host)).await?;
                if route.trim() != ROUTE_OK {
                    driver.cmd(host, &route_add_command(vip, host)).await?;
                }
                driver
                    .cmds(
                        host,
                        &[
                            ipvs_command.clone(),
                            write_file(KUBEADM_JOIN_CONFIG_PATH, config),
                            alias.clone(),
                            join_command.clone(),
                            install_lvscare.clone(),
                        ],
                    )
                    .await?;
                info!("[{}] joined as worker", host);
                Ok(())
            })
            .await
            .map_err(RuntimeError::remote("join workers"))
    }

    /// Point the load balancer of every worker at `masters`
    pub(super) async fn refresh_load_balancers(
        &self,
        driver: &InfraDriver,
        workers: &[IpAddr],
        masters: &[IpAddr],
    ) -> Result<(), RuntimeError> {
        lvscare::apply(driver, &workers_only(workers, masters), &self.load_balancer(masters)).await
    }
}
