//! Host Execution Driver
//!
//! Runs shell commands and file transfers against the hosts of a DCops-managed
//! cluster, one host or many at once.
//!
//! # Example
//!
//! ```no_run
//! use infra_driver::{HostInventory, InfraDriver, SshShell};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(cluster: crds::Cluster) -> Result<(), Box<dyn std::error::Error>> {
//! let inventory = HostInventory::from_cluster(&cluster.spec)?;
//! let driver = InfraDriver::new(inventory, Arc::new(SshShell::default()), Duration::from_secs(300));
//!
//! // Run on every master concurrently; fails with every failing host listed
//! let masters = driver.inventory().masters().to_vec();
//! driver.batch_cmd(&masters, "systemctl is-active kubelet").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Inventory**: host set, role index, per-host credentials, env, labels, taints
//! - **Batches**: one task per host, wait-for-all, no cross-host cancellation
//! - **Timeouts**: every remote command is bounded
//! - **Readiness**: SSH reachability polling with Fibonacci backoff

pub mod backoff;
pub mod batch;
pub mod driver;
pub mod env;
pub mod error;
pub mod inventory;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod shellcommand;
#[path = "trait.rs"]
pub mod shell_trait;
pub mod ssh;

pub use batch::{BatchReport, HostOutcome};
pub use driver::InfraDriver;
pub use env::EnvValue;
pub use error::{BatchError, DriverError, HostFailure};
pub use inventory::{Endpoint, HostInventory, ManagedHost, SshCredentials};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockShell, RemoteCall};
pub use shell_trait::{CommandOutput, RemoteShell};
pub use ssh::SshShell;
