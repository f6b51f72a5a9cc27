//! kubeadm configuration rendering and the remote commands built around it.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use crds::KubernetesSpec;
use infra_driver::ManagedHost;
use infra_driver::shellcommand::shell_quote;
use minijinja::context;

use crate::bootstrap_token::BootstrapToken;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::template;
use crate::version::KubeVersion;

const INIT_TEMPLATE: &str = include_str!("../templates/kubeadm-init.yaml");
const JOIN_TEMPLATE: &str = include_str!("../templates/kubeadm-join.yaml");

pub const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const REMOTE_PKI_DIR: &str = "/etc/kubernetes/pki";
pub const STATIC_POD_DIR: &str = "/etc/kubernetes/manifests";
pub const KUBEADM_CONFIG_PATH: &str = "/etc/kubernetes/kubeadm.yaml";
pub const KUBEADM_JOIN_CONFIG_PATH: &str = "/etc/kubernetes/kubeadm-join.yaml";
pub const ADMIN_KUBECONFIG_PATH: &str = "/etc/kubernetes/admin.conf";

pub const ADMIN_CONF: &str = "admin.conf";
pub const CONTROLLER_MANAGER_CONF: &str = "controller-manager.conf";
pub const SCHEDULER_CONF: &str = "scheduler.conf";
pub const KUBELET_CONF: &str = "kubelet.conf";

/// Kubeconfigs master-zero needs before `kubeadm init`
pub const PRIMARY_KUBECONFIGS: [&str; 4] = [ADMIN_CONF, CONTROLLER_MANAGER_CONF, SCHEDULER_CONF, KUBELET_CONF];
/// Kubeconfigs a joining master needs; its kubelet.conf is issued by the join itself
pub const JOIN_MASTER_KUBECONFIGS: [&str; 3] = [ADMIN_CONF, CONTROLLER_MANAGER_CONF, SCHEDULER_CONF];

/// Static files shipped under `<rootfs>/statics` and installed on masters
pub const MASTER_STATIC_FILES: [(&str, &str); 1] = [("audit-policy.yml", KUBERNETES_DIR)];

pub const UPLOAD_CERTS_COMMAND: &str = "kubeadm init phase upload-certs --upload-certs";
pub const TOKEN_CREATE_COMMAND: &str = "kubeadm token create --print-join-command";
pub const COPY_ADMIN_KUBECONFIG_COMMAND: &str =
    "rm -rf $HOME/.kube/config && mkdir -p $HOME/.kube && cp /etc/kubernetes/admin.conf $HOME/.kube/config";
/// Tear down everything kubeadm and the rootfs installed on a host
pub const RESET_COMMAND: &str = "kubeadm reset -f; \
    (ipvsadm --clear || true); \
    (modprobe -r ipip || true); \
    rm -rf /etc/kubernetes/ /etc/cni /opt/cni /var/lib/etcd /var/etcd /var/lib/kubelet $HOME/.kube/config";
const PREFLIGHT_FLAGS: &str = "--ignore-preflight-errors=SystemVerification";

/// Route check output meaning the VIP is reachable via the default route
pub const ROUTE_OK: &str = "ok";

/// kubeadm settings of one cluster
#[derive(Debug, Clone)]
pub struct KubeadmConfig {
    pub version: KubeVersion,
    pub api_server_domain: String,
    pub api_server_port: u16,
    pub vip: IpAddr,
    pub service_cidr: String,
    pub pod_cidr: String,
    pub dns_domain: String,
    pub extra_cert_sans: Vec<String>,
    pub image_repository: String,
    pub cri_socket: String,
    pub cgroup_driver: String,
}

impl KubeadmConfig {
    pub fn new(spec: &KubernetesSpec, registry_url: &str, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let version = spec
            .version
            .parse()
            .map_err(|e: crate::version::InvalidVersion| RuntimeError::Config(e.to_string()))?;
        let vip = spec
            .vip
            .parse()
            .map_err(|_| RuntimeError::Config(format!("invalid virtual IP {:?}", spec.vip)))?;
        if spec.api_server_domain.trim().is_empty() {
            return Err(RuntimeError::Config("apiServerDomain must not be empty".to_string()));
        }

        Ok(Self {
            version,
            api_server_domain: spec.api_server_domain.clone(),
            api_server_port: crds::DEFAULT_API_SERVER_PORT,
            vip,
            service_cidr: spec.service_cidr.clone(),
            pod_cidr: spec.pod_cidr.clone(),
            dns_domain: spec.dns_domain.clone(),
            extra_cert_sans: spec.cert_sans.clone(),
            image_repository: registry_url.to_string(),
            cri_socket: config.cri_socket.clone(),
            cgroup_driver: config.cgroup_driver.clone(),
        })
    }

    pub fn api_version(&self) -> &'static str {
        if self.version.is_at_least(1, 22) {
            "kubeadm.k8s.io/v1beta3"
        } else {
            "kubeadm.k8s.io/v1beta2"
        }
    }

    /// `<apiServerDomain>:6443`, resolved through /etc/hosts on every host
    pub fn control_plane_endpoint(&self) -> String {
        format!("{}:{}", self.api_server_domain, self.api_server_port)
    }

    /// `<vip>:6443`, the endpoint workers reach the control plane through
    pub fn vip_endpoint(&self) -> String {
        SocketAddr::new(self.vip, self.api_server_port).to_string()
    }

    fn vip_cidr(&self) -> String {
        match self.vip {
            IpAddr::V4(_) => format!("{}/32", self.vip),
            IpAddr::V6(_) => format!("{}/128", self.vip),
        }
    }

    /// SANs of the API server certificate: loopback, domain, VIP, every
    /// master and the configured extras, without duplicates
    pub fn cert_sans(&self, masters: &[IpAddr]) -> Vec<String> {
        let mut sans: Vec<String> = vec![
            "127.0.0.1".to_string(),
            "localhost".to_string(),
            self.api_server_domain.clone(),
            self.vip.to_string(),
        ];
        sans.extend(masters.iter().map(IpAddr::to_string));
        sans.extend(self.extra_cert_sans.iter().cloned());
        let mut seen = std::collections::HashSet::new();
        sans.retain(|s| seen.insert(s.clone()));
        sans
    }

    /// InitConfiguration, ClusterConfiguration, KubeletConfiguration and
    /// KubeProxyConfiguration for master-zero
    pub fn render_init(&self, primary: &ManagedHost, masters: &[IpAddr]) -> Result<String, RuntimeError> {
        template::render(
            "kubeadm-init",
            INIT_TEMPLATE,
            context! {
                api_version => self.api_version(),
                advertise_address => primary.addr.to_string(),
                api_server_port => self.api_server_port,
                cri_socket => &self.cri_socket,
                node_labels => node_labels(&primary.labels),
                taints => &primary.taints,
                kubernetes_version => self.version.to_string(),
                control_plane_endpoint => self.control_plane_endpoint(),
                image_repository => &self.image_repository,
                dns_domain => &self.dns_domain,
                pod_cidr => &self.pod_cidr,
                service_cidr => &self.service_cidr,
                cert_sans => self.cert_sans(masters),
                cgroup_driver => &self.cgroup_driver,
                vip_cidr => self.vip_cidr(),
            },
        )
    }

    /// JoinConfiguration for a joining master (through the API server domain,
    /// with the certificate key)
    pub fn render_master_join(&self, host: &ManagedHost, token: &BootstrapToken) -> Result<String, RuntimeError> {
        self.render_join(host, token, &self.control_plane_endpoint(), true)
    }

    /// JoinConfiguration for a joining worker (through the VIP)
    pub fn render_worker_join(&self, host: &ManagedHost, token: &BootstrapToken) -> Result<String, RuntimeError> {
        self.render_join(host, token, &self.vip_endpoint(), false)
    }

    fn render_join(
        &self,
        host: &ManagedHost,
        token: &BootstrapToken,
        endpoint: &str,
        control_plane: bool,
    ) -> Result<String, RuntimeError> {
        template::render(
            "kubeadm-join",
            JOIN_TEMPLATE,
            context! {
                api_version => self.api_version(),
                api_server_endpoint => endpoint,
                token => &token.token,
                ca_cert_hashes => &token.ca_cert_hashes,
                cri_socket => &self.cri_socket,
                node_labels => node_labels(&host.labels),
                taints => &host.taints,
                control_plane => control_plane,
                advertise_address => host.addr.to_string(),
                api_server_port => self.api_server_port,
                certificate_key => &token.certificate_key,
                cgroup_driver => &self.cgroup_driver,
            },
        )
    }

    pub fn init_command(&self) -> String {
        let upload = if self.version.is_at_least(1, 15) {
            "--upload-certs"
        } else {
            "--experimental-upload-certs"
        };
        format!("kubeadm init --config={KUBEADM_CONFIG_PATH} {upload} {PREFLIGHT_FLAGS}")
    }

    pub fn join_command(&self) -> String {
        format!("kubeadm join --config={KUBEADM_JOIN_CONFIG_PATH} {PREFLIGHT_FLAGS}")
    }
}

/// `k1=v1,k2=v2` for `--node-labels`
fn node_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Copy a file from the remote rootfs into place
pub fn copy_static_file_command(source: &str, dest_dir: &str, name: &str) -> String {
    format!(
        "mkdir -p {} && cp -f {} {}",
        shell_quote(dest_dir),
        shell_quote(source),
        shell_quote(&format!("{dest_dir}/{name}"))
    )
}

pub fn delete_node_command(node_name: &str) -> String {
    format!("kubectl delete node {} --ignore-not-found", shell_quote(node_name))
}

/// Prints [`ROUTE_OK`] when `host` reaches the VIP through its default route
pub fn route_check_command(host: IpAddr) -> String {
    format!("seautil route check --host {host}")
}

pub fn route_add_command(vip: IpAddr, host: IpAddr) -> String {
    format!("seautil route add --host {vip} --gateway {host}")
}

/// Replace the kubernetes binaries from `<rootfs>/bin` and restart kubelet
pub fn upgrade_binaries_command(rootfs: &str) -> String {
    format!(
        "chmod +x {rootfs}/bin/* && systemctl stop kubelet && \
         cp -f {rootfs}/bin/kubeadm {rootfs}/bin/kubelet {rootfs}/bin/kubectl /usr/bin/ && \
         systemctl daemon-reload && systemctl start kubelet"
    )
}

/// Upgrade the control plane from master-zero once its binaries are replaced
pub fn upgrade_apply_command(version: &KubeVersion) -> String {
    format!("kubeadm upgrade apply {version} -y {PREFLIGHT_FLAGS}")
}

/// Upgrade the local control-plane or kubelet config of any other node
pub const UPGRADE_NODE_COMMAND: &str = "kubeadm upgrade node";
