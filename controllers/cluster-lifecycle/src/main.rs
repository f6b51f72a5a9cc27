//! Cluster Lifecycle CLI
//!
//! `dcops-cluster` drives a kubeadm cluster described by a Clusterfile
//! through install, scale-up, scale-down, upgrade and reset over SSH.

mod cli;
mod error;
mod ip_list;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    install_crypto_provider();

    Cli::parse().run().await
}

/// kube's rustls client needs a process-wide provider. Must run after the
/// subscriber is installed so a failure is reported.
fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        error!("Failed to install rustls crypto provider");
    }
}
