//! Cluster Lifecycle Controller
//!
//! [`ClusterRuntime`] owns the cluster manifest, the host inventory and the
//! collaborators, and drives the cluster through Install, ScaleUp,
//! ScaleDown, Upgrade and Reset. Every step that targets several hosts is
//! one concurrent batch; tiers (master-zero, other masters, workers) are
//! separate batches run one after another.
//!
//! The inventory only changes once the remote work of a scale operation has
//! fully succeeded. The cluster status and inventory are written to the
//! [`StateStore`] after every phase change.

mod install;
mod join;
mod reset;
mod scale;
mod upgrade;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use crds::{Cluster, ClusterPhase, ClusterStatus, DEFAULT_REGISTRY_DOMAIN, DEFAULT_REGISTRY_PORT};
use infra_driver::{HostInventory, InfraDriver, RemoteShell};
use tracing::{error, info, warn};

use crate::bootstrap_token::{parse_print_join_command, parse_upload_certs_output, BootstrapToken};
use crate::cert::CertGenerator;
use crate::config::{RuntimeConfig, DEFAULT_LVSCARE_IMAGE};
use crate::confirm::Confirmer;
use crate::error::RuntimeError;
use crate::kubeadm::{KubeadmConfig, TOKEN_CREATE_COMMAND, UPLOAD_CERTS_COMMAND};
use crate::lvscare::LoadBalancerConfig;
use crate::rootfs::{RootfsDistributor, RootfsProvider};
use crate::state::StateStore;

/// External collaborators of a [`ClusterRuntime`]
#[derive(Clone)]
pub struct Collaborators {
    pub shell: Arc<dyn RemoteShell>,
    pub rootfs: Arc<dyn RootfsProvider>,
    pub certs: Arc<dyn CertGenerator>,
    pub confirmer: Arc<dyn Confirmer>,
    pub store: Arc<dyn StateStore>,
}

/// Lifecycle controller of one cluster
pub struct ClusterRuntime {
    cluster: Cluster,
    driver: InfraDriver,
    config: RuntimeConfig,
    kubeadm: KubeadmConfig,
    distributor: RootfsDistributor,
    lvscare_image: String,
    rootfs: Arc<dyn RootfsProvider>,
    certs: Arc<dyn CertGenerator>,
    confirmer: Arc<dyn Confirmer>,
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for ClusterRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRuntime")
            .field("cluster", &self.config.cluster_name)
            .field("phase", &self.phase())
            .field("hosts", &self.driver.inventory().hosts())
            .finish_non_exhaustive()
    }
}

impl ClusterRuntime {
    /// Validate the manifest and build the inventory. No remote call is made.
    pub fn new(cluster: Cluster, config: RuntimeConfig, collaborators: Collaborators) -> Result<Self, RuntimeError> {
        let inventory =
            HostInventory::from_cluster(&cluster.spec).map_err(RuntimeError::driver("load inventory"))?;

        let registry_url = inventory.registry().endpoint().map_or_else(
            || format!("{DEFAULT_REGISTRY_DOMAIN}:{DEFAULT_REGISTRY_PORT}"),
            |(domain, port)| format!("{domain}:{port}"),
        );
        let kubeadm = KubeadmConfig::new(&cluster.spec.kubernetes, &registry_url, &config)?;
        let lvscare_image = config
            .lvscare_image
            .clone()
            .unwrap_or_else(|| format!("{registry_url}/{DEFAULT_LVSCARE_IMAGE}"));

        Ok(Self {
            driver: InfraDriver::new(inventory, collaborators.shell, config.command_timeout),
            distributor: RootfsDistributor::new(config.remote_rootfs.clone()),
            cluster,
            config,
            kubeadm,
            lvscare_image,
            rootfs: collaborators.rootfs,
            certs: collaborators.certs,
            confirmer: collaborators.confirmer,
            store: collaborators.store,
        })
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn inventory(&self) -> &HostInventory {
        self.driver.inventory()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn phase(&self) -> ClusterPhase {
        self.cluster.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Load balancer every worker should run for the given masters
    pub fn load_balancer(&self, masters: &[IpAddr]) -> LoadBalancerConfig {
        LoadBalancerConfig::new(
            self.kubeadm.vip,
            self.kubeadm.api_server_port,
            masters,
            self.lvscare_image.clone(),
        )
    }

    fn status_mut(&mut self) -> &mut ClusterStatus {
        self.cluster.status.get_or_insert_with(ClusterStatus::default)
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), RuntimeError> {
        match self.phase() {
            ClusterPhase::Ready => Ok(()),
            phase => Err(RuntimeError::InvalidPhase { operation, phase }),
        }
    }

    /// Write the inventory and status back to the store
    async fn persist(&mut self) -> Result<(), RuntimeError> {
        self.cluster.spec.hosts = self.driver.inventory().to_host_specs();
        self.store.save(&self.cluster).await
    }

    async fn transition(&mut self, phase: ClusterPhase, operation: &str) -> Result<(), RuntimeError> {
        info!("Cluster {} {}: {} -> {}", self.config.cluster_name, operation, self.phase(), phase);
        let status = self.status_mut();
        status.phase = phase;
        status.last_operation = Some(operation.to_string());
        status.last_error = None;
        status.last_transition = Some(Utc::now());
        self.persist().await
    }

    /// Record a failed operation. The original error is what the caller
    /// returns; a failure to persist it is only logged.
    async fn record_failure(&mut self, phase: ClusterPhase, operation: &str, err: &RuntimeError) {
        error!("Cluster {} {} failed: {}", self.config.cluster_name, operation, err);
        let status = self.status_mut();
        status.phase = phase;
        status.last_operation = Some(operation.to_string());
        status.last_error = Some(err.to_string());
        status.last_transition = Some(Utc::now());
        if let Err(e) = self.persist().await {
            warn!("Failed to persist cluster state after {} failure: {}", operation, e);
        }
    }

    /// Wait for ssh, deliver the rootfs and write the host aliases on `hosts`
    async fn prepare_hosts(&self, driver: &InfraDriver, hosts: &[IpAddr]) -> Result<(), RuntimeError> {
        if hosts.is_empty() {
            return Ok(());
        }
        driver
            .wait_ready(hosts, self.config.ssh_ready_timeout)
            .await
            .map_err(RuntimeError::remote("wait for ssh"))?;

        let mounted = self.rootfs.mount(&self.cluster.spec.image).await?;
        let distributed = self.distributor.distribute(driver, hosts, &mounted.path).await;
        if let Err(e) = self.rootfs.unmount(&mounted).await {
            warn!("Failed to unmount rootfs {}: {}", mounted.path.display(), e);
        }
        distributed?;

        driver
            .apply_host_aliases(hosts)
            .await
            .map_err(RuntimeError::remote("apply host aliases"))
    }

    /// Run the cluster image's launch commands on `primary`, in manifest order
    async fn run_launch_commands(&self, driver: &InfraDriver, primary: IpAddr) -> Result<(), RuntimeError> {
        let commands: Vec<String> = self
            .cluster
            .spec
            .cmd
            .iter()
            .map(|command| self.distributor.launch_command(driver, primary, command))
            .collect();
        if commands.is_empty() {
            return Ok(());
        }
        info!("[{}] running {} launch command(s)", primary, commands.len());
        driver
            .cmds(primary, &commands)
            .await
            .map_err(RuntimeError::driver("launch commands"))
    }

    /// Issue a fresh token and certificate key on `primary`
    async fn fresh_token(&self, driver: &InfraDriver, primary: IpAddr) -> Result<BootstrapToken, RuntimeError> {
        let upload_output = driver
            .cmd(primary, UPLOAD_CERTS_COMMAND)
            .await
            .map_err(RuntimeError::driver("upload certificates"))?;
        let certificate_key = parse_upload_certs_output(&upload_output)?;

        let join_output = driver
            .cmd(primary, TOKEN_CREATE_COMMAND)
            .await
            .map_err(RuntimeError::driver("create bootstrap token"))?;
        let token = parse_print_join_command(&join_output)?.with_certificate_key(certificate_key);
        token.validate()?;
        info!("Issued join credentials: {}", token.redacted_join_command());
        Ok(token)
    }
}

fn primary_of(inventory: &HostInventory) -> Result<IpAddr, RuntimeError> {
    inventory
        .primary_master()
        .ok_or_else(|| RuntimeError::Config("cluster has no master".to_string()))
}

/// Workers that do not also hold the master role
fn workers_only(workers: &[IpAddr], masters: &[IpAddr]) -> Vec<IpAddr> {
    workers.iter().copied().filter(|w| !masters.contains(w)).collect()
}
