//! HA Load-Balancer Configurator
//!
//! Every worker runs lvscare as a static pod: an IPVS virtual server on the
//! cluster VIP balancing to every master's API server, with HTTPS health
//! probes that drop failing backends. The kubelet watches the manifest
//! directory, so rewriting the manifest is the whole reload.

use std::net::{IpAddr, SocketAddr};

use infra_driver::shellcommand::{shell_quote, write_file};
use infra_driver::{BatchError, InfraDriver};
use minijinja::context;
use tracing::info;

use crate::error::RuntimeError;
use crate::kubeadm::STATIC_POD_DIR;
use crate::template;

const LVSCARE_TEMPLATE: &str = include_str!("../templates/kube-lvscare.yaml");

pub const LVSCARE_MANIFEST: &str = "kube-lvscare.yaml";
pub const DEFAULT_HEALTH_PATH: &str = "/healthz";
pub const DEFAULT_HEALTH_SCHEME: &str = "https";

/// One virtual IP and its backend set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerConfig {
    pub vip: IpAddr,
    pub port: u16,
    pub backends: Vec<SocketAddr>,
    pub health_path: String,
    pub health_scheme: String,
    pub image: String,
}

impl LoadBalancerConfig {
    /// Backends are every master on `port`
    pub fn new(vip: IpAddr, port: u16, masters: &[IpAddr], image: impl Into<String>) -> Self {
        Self {
            vip,
            port,
            backends: masters.iter().map(|m| SocketAddr::new(*m, port)).collect(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            health_scheme: DEFAULT_HEALTH_SCHEME.to_string(),
            image: image.into(),
        }
    }

    pub fn virtual_server(&self) -> SocketAddr {
        SocketAddr::new(self.vip, self.port)
    }

    pub fn render_manifest(&self) -> Result<String, RuntimeError> {
        template::render(
            "kube-lvscare",
            LVSCARE_TEMPLATE,
            context! {
                image => &self.image,
                virtual_server => self.virtual_server().to_string(),
                backends => self.backends.iter().map(ToString::to_string).collect::<Vec<_>>(),
                health_path => &self.health_path,
                health_scheme => &self.health_scheme,
            },
        )
    }

    /// Program the IPVS rules once so the VIP answers before the kubelet
    /// (and with it the static pod) is running
    pub fn ipvs_command(&self) -> String {
        let backends: Vec<String> = self.backends.iter().map(|b| format!("--rs {b}")).collect();
        format!(
            "seautil ipvs --vs {} {} --health-path {} --health-schem {} --run-once",
            self.virtual_server(),
            backends.join(" "),
            self.health_path,
            self.health_scheme
        )
    }

    /// Write the manifest next to its final path and move it into place only
    /// when it changed, so the kubelet does not restart an identical pod
    pub fn install_command(&self) -> Result<String, RuntimeError> {
        let manifest = self.render_manifest()?;
        let target = format!("{STATIC_POD_DIR}/{LVSCARE_MANIFEST}");
        let staging = format!("{STATIC_POD_DIR}/.{LVSCARE_MANIFEST}.tmp");
        Ok(format!(
            "{} && if cmp -s {staging_q} {target_q}; then rm -f {staging_q}; else mv -f {staging_q} {target_q}; fi",
            write_file(&staging, &manifest),
            staging_q = shell_quote(&staging),
            target_q = shell_quote(&target),
        ))
    }
}

/// Install or refresh lvscare on every worker with the current backend set
pub async fn apply(driver: &InfraDriver, workers: &[IpAddr], lb: &LoadBalancerConfig) -> Result<(), RuntimeError> {
    if workers.is_empty() {
        return Ok(());
    }
    info!(
        "Configuring lvscare on {} worker(s): {} -> {:?}",
        workers.len(),
        lb.virtual_server(),
        lb.backends
    );
    let commands = [lb.ipvs_command(), lb.install_command()?];
    let commands = &commands;
    driver
        .execute(workers, |host| async move { driver.cmds(host, commands).await })
        .await
        .map_err(|e: BatchError| RuntimeError::Remote {
            step: "configure load balancer",
            source: e,
        })
}
