//! Control-plane settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default virtual IP advertised to workers
pub const DEFAULT_VIP: &str = "10.103.97.2";

/// Default API server domain
pub const DEFAULT_API_SERVER_DOMAIN: &str = "apiserver.cluster.local";

/// Default API server port
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

/// Control-plane settings rendered into the kubeadm configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSpec {
    /// Kubernetes version (e.g. `v1.22.15`)
    #[serde(default = "default_version")]
    pub version: String,

    /// Domain every host uses to reach the API server
    #[serde(default = "default_api_server_domain")]
    pub api_server_domain: String,

    /// Virtual IP load-balanced across masters on every worker
    #[serde(default = "default_vip")]
    pub vip: String,

    /// Service CIDR
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,

    /// Pod CIDR
    #[serde(default = "default_pod_cidr")]
    pub pod_cidr: String,

    /// Cluster DNS domain
    #[serde(default = "default_dns_domain")]
    pub dns_domain: String,

    /// Extra API server certificate SANs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,
}

impl Default for KubernetesSpec {
    fn default() -> Self {
        Self {
            version: default_version(),
            api_server_domain: default_api_server_domain(),
            vip: default_vip(),
            service_cidr: default_service_cidr(),
            pod_cidr: default_pod_cidr(),
            dns_domain: default_dns_domain(),
            cert_sans: Vec::new(),
        }
    }
}

fn default_version() -> String {
    "v1.22.15".to_string()
}

fn default_api_server_domain() -> String {
    DEFAULT_API_SERVER_DOMAIN.to_string()
}

fn default_vip() -> String {
    DEFAULT_VIP.to_string()
}

fn default_service_cidr() -> String {
    "10.96.0.0/22".to_string()
}

fn default_pod_cidr() -> String {
    "100.64.0.0/10".to_string()
}

fn default_dns_domain() -> String {
    "cluster.local".to_string()
}
