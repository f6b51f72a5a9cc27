//! Cluster CRD
//!
//! Top-level cluster manifest and the lifecycle phase recorded in its status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::host::{HostAlias, HostSpec, Role, SshSpec};
use crate::kubernetes::KubernetesSpec;
use crate::registry::RegistrySpec;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Cluster",
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster image whose rootfs is distributed to every host
    pub image: String,

    /// Cluster-wide environment in `KEY=VALUE` form; `KEY=A;B` declares a list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Launch commands carried by the cluster image. Run on master-zero from
    /// the rootfs directory after install and after every scale-up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    /// Default SSH credentials, merged into every host that leaves a field unset
    #[serde(default)]
    pub ssh: SshSpec,

    /// Host groups
    pub hosts: Vec<HostSpec>,

    /// Image registry configuration
    #[serde(default)]
    pub registry: RegistrySpec,

    /// Extra `/etc/hosts` entries written on every host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_aliases: Vec<HostAlias>,

    /// Control-plane settings
    #[serde(default)]
    pub kubernetes: KubernetesSpec,
}

impl ClusterSpec {
    /// All IP strings holding `role`, in manifest order
    pub fn ips_by_role(&self, role: Role) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| h.roles.contains(&role))
            .flat_map(|h| h.ips.iter().map(String::as_str))
            .collect()
    }

    /// Master IP strings, in manifest order
    pub fn master_ips(&self) -> Vec<&str> {
        self.ips_by_role(Role::Master)
    }

    /// Worker IP strings, in manifest order
    pub fn worker_ips(&self) -> Vec<&str> {
        self.ips_by_role(Role::Worker)
    }
}

/// Lifecycle phase of a cluster as driven by the lifecycle engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterPhase {
    /// No cluster has been bootstrapped
    #[default]
    Uninitialized,

    /// Install is running, or a previous install failed part way
    Bootstrapping,

    /// Cluster is serving
    Ready,

    /// Hosts are being added or removed
    Scaling,

    /// Binaries are being replaced
    Upgrading,

    /// Teardown is running, or a previous teardown failed part way
    Resetting,

    /// Cluster was torn down; inventory kept for a later install
    Reset,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Bootstrapping => "bootstrapping",
            Self::Ready => "ready",
            Self::Scaling => "scaling",
            Self::Upgrading => "upgrading",
            Self::Resetting => "resetting",
            Self::Reset => "reset",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Kubernetes version running on the hosts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Name of the last lifecycle operation attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<String>,

    /// Error message of the last failed operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Last phase transition timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<chrono::DateTime<chrono::Utc>>,
}
