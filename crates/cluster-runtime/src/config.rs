//! Runtime configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root of per-cluster data on every host
pub const DEFAULT_REMOTE_DATA_ROOT: &str = "/var/lib/dcops/data";
/// lvscare image path, resolved against the cluster registry
pub const DEFAULT_LVSCARE_IMAGE: &str = "dcops/lvscare:v1.1.3-beta.8";
pub const DEFAULT_CRI_SOCKET: &str = "unix:///run/containerd/containerd.sock";
pub const DEFAULT_CGROUP_DRIVER: &str = "systemd";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_SSH_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Settings of one lifecycle run that do not come from the cluster manifest
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub cluster_name: String,
    /// Local directory for generated PKI, kubeconfigs and the fetched admin kubeconfig
    pub work_dir: PathBuf,
    /// Where the rootfs lands on every host
    pub remote_rootfs: String,
    pub command_timeout: Duration,
    pub ssh_ready_timeout: Duration,
    /// Full lvscare image reference; defaults to [`DEFAULT_LVSCARE_IMAGE`] in the cluster registry
    pub lvscare_image: Option<String>,
    pub cri_socket: String,
    pub cgroup_driver: String,
    /// List nodes through the fetched kubeconfig after install
    pub verify_nodes: bool,
}

impl RuntimeConfig {
    /// Defaults for `cluster_name`, keeping local state under `state_dir/<cluster_name>`
    pub fn new(cluster_name: impl Into<String>, state_dir: &Path) -> Self {
        let cluster_name = cluster_name.into();
        Self {
            work_dir: state_dir.join(&cluster_name),
            remote_rootfs: format!("{DEFAULT_REMOTE_DATA_ROOT}/{cluster_name}/rootfs"),
            cluster_name,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            ssh_ready_timeout: DEFAULT_SSH_READY_TIMEOUT,
            lvscare_image: None,
            cri_socket: DEFAULT_CRI_SOCKET.to_string(),
            cgroup_driver: DEFAULT_CGROUP_DRIVER.to_string(),
            verify_nodes: false,
        }
    }

    pub fn pki_dir(&self) -> PathBuf {
        self.work_dir.join("pki")
    }

    pub fn etcd_pki_dir(&self) -> PathBuf {
        self.pki_dir().join("etcd")
    }

    pub fn kubeconfig_dir(&self) -> PathBuf {
        self.work_dir.join("kubeconfig")
    }

    /// Admin kubeconfig pulled back from master-zero
    pub fn admin_kubeconfig(&self) -> PathBuf {
        self.work_dir.join("admin.conf")
    }

    /// Path below the remote rootfs
    pub fn remote_path(&self, relative: &str) -> String {
        format!("{}/{}", self.remote_rootfs.trim_end_matches('/'), relative)
    }
}
