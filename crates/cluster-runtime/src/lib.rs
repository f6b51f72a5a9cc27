//! Cluster Lifecycle Engine
//!
//! Takes a set of hosts described by a [`crds::Cluster`] manifest from
//! nothing to a running kubeadm cluster and evolves it: scale up, scale
//! down, upgrade, reset.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use cluster_runtime::{
//!     ClusterRuntime, ClusterfileStore, Collaborators, KubeadmCertGenerator, LocalRootfs,
//!     RuntimeConfig, StateStore, StdinConfirmer,
//! };
//! use infra_driver::SshShell;
//!
//! # async fn example() -> Result<(), cluster_runtime::RuntimeError> {
//! let store = Arc::new(ClusterfileStore::new("Clusterfile"));
//! let cluster = store.load().await?;
//! let config = RuntimeConfig::new("my-cluster", Path::new("/var/lib/dcops"));
//! let mut runtime = ClusterRuntime::new(
//!     cluster,
//!     config,
//!     Collaborators {
//!         shell: Arc::new(SshShell::default()),
//!         rootfs: Arc::new(LocalRootfs::new("/var/lib/dcops/rootfs")),
//!         certs: Arc::new(KubeadmCertGenerator::default()),
//!         confirmer: Arc::new(StdinConfirmer),
//!         store,
//!     },
//! )?;
//! runtime.install().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`rootfs`]: delivers the cluster image rootfs to hosts
//! - [`bootstrap_token`]: join credentials scraped from kubeadm output
//! - [`lvscare`]: per-worker IPVS load balancer in front of the masters
//! - [`kubeadm`]: kubeadm configs and remote commands
//! - [`lifecycle`]: the operations themselves

pub mod bootstrap_token;
pub mod cert;
pub mod config;
pub mod confirm;
pub mod error;
pub mod kubeadm;
pub mod lifecycle;
pub mod lvscare;
pub mod rootfs;
pub mod state;
mod template;
#[cfg(test)]
mod testing;
pub mod verify;
pub mod version;

pub use bootstrap_token::{BootstrapToken, TokenParseError};
pub use cert::{CertGenerator, CertRequest, KubeadmCertGenerator, KubeconfigRequest};
pub use config::RuntimeConfig;
pub use confirm::{AutoConfirm, Confirmer, StdinConfirmer};
pub use error::RuntimeError;
pub use lifecycle::{ClusterRuntime, Collaborators};
pub use lvscare::LoadBalancerConfig;
pub use rootfs::{LocalRootfs, MountedRootfs, RootfsDistributor, RootfsProvider};
pub use state::{ClusterfileStore, MemoryStore, StateStore};
pub use version::KubeVersion;
