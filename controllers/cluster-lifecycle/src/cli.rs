//! Command line

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cluster_runtime::{
    AutoConfirm, ClusterRuntime, ClusterfileStore, Collaborators, Confirmer, KubeadmCertGenerator, LocalRootfs,
    RuntimeConfig, RuntimeError, StateStore, StdinConfirmer,
};
use infra_driver::SshShell;
use tracing::{info, warn};

use crate::error::ControllerError;
use crate::ip_list::IpList;

/// Bare-metal Kubernetes cluster lifecycle over SSH
#[derive(Parser, Debug)]
#[command(name = "dcops-cluster")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Cluster manifest; updated in place with the phase and host list
    #[arg(short = 'f', long, global = true, default_value = "Clusterfile", env = "DCOPS_CLUSTERFILE")]
    pub clusterfile: PathBuf,

    /// Local directory for generated certificates and kubeconfigs
    #[arg(long, global = true, default_value = "/var/lib/dcops", env = "DCOPS_STATE_DIR")]
    pub state_dir: PathBuf,

    /// Unpacked cluster image rootfs [default: <state-dir>/<cluster>/rootfs]
    #[arg(long, global = true, env = "DCOPS_ROOTFS")]
    pub rootfs: Option<PathBuf>,

    /// Do not ask before destroying hosts
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Per remote command timeout
    #[arg(long, global = true, value_name = "SECONDS", default_value_t = 600)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bootstrap master-zero, join the other masters, then the workers
    Install {
        /// List nodes through the admin kubeconfig once installed
        #[arg(long)]
        verify: bool,
    },
    /// Join new masters and workers to the running cluster
    ScaleUp(HostArgs),
    /// Reset and remove masters and workers from the running cluster
    ScaleDown(HostArgs),
    /// Upgrade every host to the Kubernetes version in the Clusterfile
    Upgrade,
    /// Tear the cluster down on every host
    Reset,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Masters, e.g. `10.0.0.4,10.0.0.5` or `10.0.0.4-10.0.0.6`
    #[arg(long, value_name = "IPS", default_value = "")]
    pub masters: IpList,

    /// Workers, same syntax as --masters
    #[arg(long, value_name = "IPS", default_value = "")]
    pub nodes: IpList,
}

impl Cli {
    /// Load the Clusterfile, wire the collaborators and run the command
    pub async fn run(self) -> anyhow::Result<()> {
        let store = Arc::new(ClusterfileStore::new(self.clusterfile.clone()));
        let cluster = store
            .load()
            .await
            .with_context(|| format!("loading {}", self.clusterfile.display()))?;
        let name = cluster
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::UnnamedCluster(self.clusterfile.display().to_string()))?;

        let mut config = RuntimeConfig::new(name.as_str(), &self.state_dir);
        config.command_timeout = Duration::from_secs(self.timeout);
        if let Command::Install { verify } = &self.command {
            config.verify_nodes = *verify;
        }
        let rootfs = self.rootfs.clone().unwrap_or_else(|| config.work_dir.join("rootfs"));
        let confirmer: Arc<dyn Confirmer> = if self.yes {
            Arc::new(AutoConfirm(true))
        } else {
            Arc::new(StdinConfirmer)
        };

        info!("Cluster {} from {}", name, self.clusterfile.display());
        let mut runtime = ClusterRuntime::new(
            cluster,
            config,
            Collaborators {
                shell: Arc::new(SshShell::default()),
                rootfs: Arc::new(LocalRootfs::new(rootfs)),
                certs: Arc::new(KubeadmCertGenerator::default()),
                confirmer,
                store,
            },
        )?;

        let result = match &self.command {
            Command::Install { .. } => runtime.install().await,
            Command::ScaleUp(hosts) => runtime.scale_up(&hosts.masters.0, &hosts.nodes.0).await,
            Command::ScaleDown(hosts) => runtime.scale_down(&hosts.masters.0, &hosts.nodes.0).await,
            Command::Upgrade => runtime.upgrade().await,
            Command::Reset => runtime.reset().await,
        };

        match result {
            Ok(()) => {
                info!("Cluster {} is {}", name, runtime.phase());
                Ok(())
            }
            Err(RuntimeError::Aborted(reason)) => {
                warn!("Nothing changed: {}", reason);
                Ok(())
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("Hosts {:?} failed; the command can be run again", e.failed_hosts());
                }
                Err(e.into())
            }
        }
    }
}
