//! Install: bootstrap master-zero, join the other masters, join the workers

use std::net::IpAddr;

use crds::ClusterPhase;
use infra_driver::InfraDriver;
use infra_driver::shellcommand::write_file;
use tracing::{debug, info, warn};

use super::{ClusterRuntime, primary_of};
use crate::bootstrap_token::{BootstrapToken, parse_init_output};
use crate::cert::{CertRequest, KubeconfigRequest};
use crate::error::RuntimeError;
use crate::kubeadm::{
    ADMIN_KUBECONFIG_PATH, COPY_ADMIN_KUBECONFIG_COMMAND, KUBEADM_CONFIG_PATH, KUBERNETES_DIR,
    MASTER_STATIC_FILES, PRIMARY_KUBECONFIGS, REMOTE_PKI_DIR, copy_static_file_command,
};
use crate::verify::verify_nodes;

const OPERATION: &str = "install";

impl ClusterRuntime {
    /// Take the cluster from nothing to Ready.
    ///
    /// Allowed from Uninitialized, Reset, or Bootstrapping after a failed
    /// install. On a Ready cluster it fails with
    /// [`RuntimeError::AlreadyInitialized`] before any remote call.
    pub async fn install(&mut self) -> Result<(), RuntimeError> {
        match self.phase() {
            ClusterPhase::Uninitialized | ClusterPhase::Reset | ClusterPhase::Bootstrapping => {}
            ClusterPhase::Ready => return Err(RuntimeError::AlreadyInitialized(ClusterPhase::Ready)),
            phase => {
                return Err(RuntimeError::InvalidPhase {
                    operation: OPERATION,
                    phase,
                });
            }
        }

        self.transition(ClusterPhase::Bootstrapping, OPERATION).await?;
        match self.run_install().await {
            Ok(()) => {
                let version = self.kubeadm.version.to_string();
                self.status_mut().kubernetes_version = Some(version);
                self.transition(ClusterPhase::Ready, OPERATION).await
            }
            Err(e) => {
                self.record_failure(ClusterPhase::Bootstrapping, OPERATION, &e).await;
                Err(e)
            }
        }
    }

    async fn run_install(&self) -> Result<(), RuntimeError> {
        let driver = &self.driver;
        let inventory = driver.inventory();
        let primary = primary_of(inventory)?;
        let masters = inventory.masters().to_vec();

        self.prepare_hosts(driver, inventory.hosts()).await?;

        let token = self.bootstrap_primary(driver, primary, &masters).await?;
        self.join_masters(driver, &inventory.secondary_masters(), primary, &token)
            .await?;
        self.join_workers(driver, inventory.workers(), &masters, &token)
            .await?;
        self.run_launch_commands(driver, primary).await?;

        let admin = self.config.admin_kubeconfig();
        driver
            .fetch(primary, ADMIN_KUBECONFIG_PATH, &admin)
            .await
            .map_err(RuntimeError::driver("fetch admin kubeconfig"))?;
        info!("Admin kubeconfig written to {}", admin.display());

        if self.config.verify_nodes
            && let Err(e) = verify_nodes(&admin, inventory.hosts().len()).await
        {
            warn!("Node verification failed: {}", e);
        }
        Ok(())
    }

    /// Generate certificates, push them with the kubeadm config to
    /// master-zero and run `kubeadm init` there
    async fn bootstrap_primary(
        &self,
        driver: &InfraDriver,
        primary: IpAddr,
        masters: &[IpAddr],
    ) -> Result<BootstrapToken, RuntimeError> {
        let host = driver
            .inventory()
            .get(primary)
            .ok_or_else(|| RuntimeError::Config(format!("primary master {primary} is not in the inventory")))?;

        let init_config = self.kubeadm.render_init(host, masters)?;
        driver
            .cmd(primary, &write_file(KUBEADM_CONFIG_PATH, &init_config))
            .await
            .map_err(RuntimeError::driver("write kubeadm config"))?;

        let hostname = driver
            .hostname(primary)
            .await
            .map_err(RuntimeError::driver("read master-zero hostname"))?;
        self.certs
            .generate(&CertRequest {
                pki_dir: self.config.pki_dir(),
                etcd_pki_dir: self.config.etcd_pki_dir(),
                hostname: hostname.clone(),
                master_zero: primary,
                service_cidr: self.kubeadm.service_cidr.clone(),
                dns_domain: self.kubeadm.dns_domain.clone(),
                control_plane_endpoint: self.kubeadm.control_plane_endpoint(),
                sans: self.kubeadm.cert_sans(masters),
            })
            .await?;
        self.certs
            .create_kubeconfigs(&KubeconfigRequest {
                pki_dir: self.config.pki_dir(),
                out_dir: self.config.kubeconfig_dir(),
                hostname,
                master_zero: primary,
                control_plane_endpoint: self.kubeadm.control_plane_endpoint(),
            })
            .await?;

        driver
            .copy(primary, &self.config.pki_dir(), REMOTE_PKI_DIR)
            .await
            .map_err(RuntimeError::driver("copy certificates"))?;
        self.copy_kubeconfigs(driver, primary, &PRIMARY_KUBECONFIGS).await?;
        driver
            .cmds(primary, &self.static_file_commands())
            .await
            .map_err(RuntimeError::driver("copy static files"))?;

        driver
            .set_host_alias(primary, &self.kubeadm.api_server_domain, &primary.to_string())
            .await
            .map_err(RuntimeError::driver("set api server alias"))?;

        info!("[{}] kubeadm init", primary);
        let output = driver
            .cmd(primary, &self.kubeadm.init_command())
            .await
            .map_err(RuntimeError::driver("kubeadm init"))?;
        debug!("[{}] kubeadm init output:\n{}", primary, output);

        driver
            .cmd(primary, COPY_ADMIN_KUBECONFIG_COMMAND)
            .await
            .map_err(RuntimeError::driver("install admin kubeconfig"))?;

        let token = parse_init_output(&output)?;
        token.validate()?;
        info!("Master-zero {} initialized: {}", primary, token.redacted_join_command());
        Ok(token)
    }

    /// Copy generated kubeconfigs to /etc/kubernetes on `host`
    async fn copy_kubeconfigs(
        &self,
        driver: &InfraDriver,
        host: IpAddr,
        names: &[&str],
    ) -> Result<(), RuntimeError> {
        let dir = self.config.kubeconfig_dir();
        for name in names {
            driver
                .copy(host, &dir.join(name), &format!("{KUBERNETES_DIR}/{name}"))
                .await
                .map_err(RuntimeError::driver("copy kubeconfig"))?;
        }
        Ok(())
    }

    /// Commands installing the static files shipped in the rootfs on a master
    pub(super) fn static_file_commands(&self) -> Vec<String> {
        MASTER_STATIC_FILES
            .iter()
            .map(|(name, dest)| {
                copy_static_file_command(&self.config.remote_path(&format!("statics/{name}")), dest, name)
            })
            .collect()
    }
}
