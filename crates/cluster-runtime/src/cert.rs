//! Certificate and kubeconfig generation
//!
//! Cluster PKI is generated locally, before master-zero bootstraps, and then
//! copied to the masters. The default generator shells out to the local
//! `kubeadm` binary phase by phase.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::RuntimeError;

/// Inputs for the cluster CA and serving certificates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    pub pki_dir: PathBuf,
    pub etcd_pki_dir: PathBuf,
    /// Hostname of master-zero
    pub hostname: String,
    pub master_zero: IpAddr,
    pub service_cidr: String,
    pub dns_domain: String,
    pub control_plane_endpoint: String,
    pub sans: Vec<String>,
}

/// Inputs for the admin, controller-manager, scheduler and kubelet kubeconfigs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigRequest {
    pub pki_dir: PathBuf,
    pub out_dir: PathBuf,
    pub hostname: String,
    pub master_zero: IpAddr,
    /// `<apiServerDomain>:6443`
    pub control_plane_endpoint: String,
}

/// Produces certificate material on local disk
#[async_trait]
pub trait CertGenerator: Send + Sync {
    async fn generate(&self, request: &CertRequest) -> Result<(), RuntimeError>;

    async fn create_kubeconfigs(&self, request: &KubeconfigRequest) -> Result<(), RuntimeError>;
}

/// [`CertGenerator`] running `kubeadm init phase certs|kubeconfig` locally
#[derive(Debug, Clone)]
pub struct KubeadmCertGenerator {
    program: String,
}

impl Default for KubeadmCertGenerator {
    fn default() -> Self {
        Self {
            program: "kubeadm".to_string(),
        }
    }
}

impl KubeadmCertGenerator {
    /// Use a specific kubeadm binary, e.g. the one shipped in the rootfs
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn certs_args(request: &CertRequest) -> Vec<String> {
        let mut args = vec![
            "init".to_string(),
            "phase".to_string(),
            "certs".to_string(),
            "all".to_string(),
            format!("--cert-dir={}", request.pki_dir.display()),
            format!("--apiserver-advertise-address={}", request.master_zero),
            format!("--control-plane-endpoint={}", request.control_plane_endpoint),
            format!("--service-cidr={}", request.service_cidr),
            format!("--service-dns-domain={}", request.dns_domain),
        ];
        if !request.sans.is_empty() {
            args.push(format!("--apiserver-cert-extra-sans={}", request.sans.join(",")));
        }
        args
    }

    pub fn kubeconfig_args(request: &KubeconfigRequest) -> Vec<String> {
        vec![
            "init".to_string(),
            "phase".to_string(),
            "kubeconfig".to_string(),
            "all".to_string(),
            format!("--cert-dir={}", request.pki_dir.display()),
            format!("--kubeconfig-dir={}", request.out_dir.display()),
            format!("--apiserver-advertise-address={}", request.master_zero),
            format!("--control-plane-endpoint={}", request.control_plane_endpoint),
            format!("--node-name={}", request.hostname),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<(), RuntimeError> {
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::Cert(format!("failed to run {}: {e}", self.program)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Cert(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.get(2).map_or("", String::as_str),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), RuntimeError> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

#[async_trait]
impl CertGenerator for KubeadmCertGenerator {
    async fn generate(&self, request: &CertRequest) -> Result<(), RuntimeError> {
        info!("Generating cluster certificates for {}", request.hostname);
        ensure_dir(&request.pki_dir).await?;
        ensure_dir(&request.etcd_pki_dir).await?;
        self.run(&Self::certs_args(request)).await
    }

    async fn create_kubeconfigs(&self, request: &KubeconfigRequest) -> Result<(), RuntimeError> {
        info!("Generating kubeconfigs for {}", request.hostname);
        ensure_dir(&request.out_dir).await?;
        self.run(&Self::kubeconfig_args(request)).await
    }
}
