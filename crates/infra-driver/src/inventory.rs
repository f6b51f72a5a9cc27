//! Managed host inventory
//!
//! Owned view of the cluster's hosts built from the manifest: host set,
//! role-to-host index, the primary (master-zero) designation, per-host
//! credentials and metadata. Scale operations never mutate an inventory in
//! place; they derive a new one that the caller commits once the remote work
//! succeeded.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crds::{
    parse_taints, ClusterSpec, HostAlias, HostSpec, LocalRegistry, RegistryConfig, RegistrySpec,
    Role, SshSpec, DEFAULT_REGISTRY_DOMAIN, DEFAULT_REGISTRY_PORT, DEFAULT_SSH_PORT,
    DEFAULT_SSH_USER,
};
use k8s_openapi::api::core::v1::Taint;

use crate::env::{
    merge_env, parse_env, EnvValue, HOST_IP_FAMILY_KEY, HOST_IP_KEY, REGISTRY_DOMAIN_KEY,
    REGISTRY_PORT_KEY, REGISTRY_URL_KEY,
};
use crate::error::DriverError;

/// Resolved SSH credentials for one host
#[derive(Clone, PartialEq, Eq)]
pub struct SshCredentials {
    pub user: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub port: u16,
}

impl SshCredentials {
    /// Resolve a (merged) SSH spec. Needs a password or a private key.
    pub fn from_spec(spec: &SshSpec) -> Result<Self, DriverError> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

        let password = non_empty(&spec.passwd);
        let private_key = non_empty(&spec.pk).map(PathBuf::from);
        if password.is_none() && private_key.is_none() {
            return Err(DriverError::InvalidConfig(
                "ssh credentials need a password or a private key".to_string(),
            ));
        }

        Ok(Self {
            user: non_empty(&spec.user).unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            password,
            private_key,
            passphrase: non_empty(&spec.pk_passwd),
            port: spec.port.unwrap_or(DEFAULT_SSH_PORT),
        })
    }
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .field("port", &self.port)
            .finish()
    }
}

/// What a transport needs to reach one host
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub credentials: Arc<SshCredentials>,
}

/// One host of the inventory
#[derive(Debug, Clone)]
pub struct ManagedHost {
    pub addr: IpAddr,
    pub roles: BTreeSet<Role>,
    pub credentials: Arc<SshCredentials>,
    /// Host-level env, before merging with the cluster env
    pub env: BTreeMap<String, EnvValue>,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    /// Host-level manifest fields, kept so the inventory can be written back
    source: HostSpec,
}

impl ManagedHost {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Hosts of one cluster with their role index
#[derive(Debug, Clone)]
pub struct HostInventory {
    hosts: BTreeMap<IpAddr, ManagedHost>,
    /// Manifest order
    order: Vec<IpAddr>,
    roles: BTreeMap<Role, Vec<IpAddr>>,
    primary: Option<IpAddr>,
    cluster_env: BTreeMap<String, EnvValue>,
    registry: RegistrySpec,
    host_aliases: Vec<HostAlias>,
    ssh_defaults: SshSpec,
}

impl HostInventory {
    /// Build and validate an inventory from the cluster manifest.
    ///
    /// Rejects: no hosts, unparsable addresses, mixed IPv4/IPv6, duplicate
    /// addresses, hosts without a role, no master, missing credentials,
    /// malformed taints, an external registry without a domain.
    pub fn from_cluster(spec: &ClusterSpec) -> Result<Self, DriverError> {
        let registry = normalize_registry(&spec.registry)?;
        let mut inventory = Self {
            hosts: BTreeMap::new(),
            order: Vec::new(),
            roles: BTreeMap::new(),
            primary: None,
            cluster_env: parse_env(&spec.env)?,
            registry,
            host_aliases: spec.host_aliases.clone(),
            ssh_defaults: spec.ssh.clone(),
        };

        for group in &spec.hosts {
            if group.roles.is_empty() {
                return Err(DriverError::InvalidConfig(format!(
                    "host group {:?} has no role",
                    group.ips
                )));
            }
            let credentials = Arc::new(SshCredentials::from_spec(
                &group.ssh.merged_with(&spec.ssh),
            )?);
            let taints = parse_taints(&group.taints)
                .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
            let env = parse_env(&group.env)?;
            let source = HostSpec {
                ips: Vec::new(),
                roles: Vec::new(),
                ..group.clone()
            };

            for raw in &group.ips {
                let addr = parse_addr(raw)?;
                if inventory.hosts.contains_key(&addr) {
                    return Err(DriverError::InvalidConfig(format!(
                        "host {addr} is declared more than once"
                    )));
                }
                inventory.order.push(addr);
                inventory.hosts.insert(
                    addr,
                    ManagedHost {
                        addr,
                        roles: group.roles.iter().copied().collect(),
                        credentials: Arc::clone(&credentials),
                        env: env.clone(),
                        labels: group.labels.clone(),
                        taints: taints.clone(),
                        source: source.clone(),
                    },
                );
            }
        }

        if inventory.order.is_empty() {
            return Err(DriverError::InvalidConfig("cluster has no hosts".to_string()));
        }
        inventory.check_family()?;
        inventory.rebuild_index();
        if inventory.masters().is_empty() {
            return Err(DriverError::InvalidConfig(
                "cluster needs at least one master".to_string(),
            ));
        }
        inventory.fill_cluster_env();

        Ok(inventory)
    }

    fn check_family(&self) -> Result<(), DriverError> {
        let mut families = self.order.iter().map(IpAddr::is_ipv6);
        if let Some(first) = families.next()
            && families.any(|v6| v6 != first)
        {
            return Err(DriverError::InvalidConfig(
                "hosts mix IPv4 and IPv6 addresses".to_string(),
            ));
        }
        Ok(())
    }

    /// Role index and primary follow the host set; the primary only moves
    /// when it stops being a master.
    fn rebuild_index(&mut self) {
        self.roles.clear();
        for addr in &self.order {
            if let Some(host) = self.hosts.get(addr) {
                for role in &host.roles {
                    self.roles.entry(*role).or_default().push(*addr);
                }
            }
        }
        let masters = self.masters();
        self.primary = match self.primary {
            Some(p) if masters.contains(&p) => Some(p),
            _ => masters.first().copied(),
        };
    }

    fn fill_cluster_env(&mut self) {
        if self.is_ipv6() {
            self.cluster_env
                .entry(HOST_IP_FAMILY_KEY.to_string())
                .or_insert_with(|| EnvValue::from("IPv6"));
        }
        if let Some((domain, port)) = self.registry.endpoint() {
            let (domain, port) = (domain.to_string(), port);
            self.cluster_env
                .entry(REGISTRY_DOMAIN_KEY.to_string())
                .or_insert_with(|| EnvValue::Single(domain.clone()));
            self.cluster_env
                .entry(REGISTRY_PORT_KEY.to_string())
                .or_insert_with(|| EnvValue::Single(port.to_string()));
            self.cluster_env
                .entry(REGISTRY_URL_KEY.to_string())
                .or_insert_with(|| EnvValue::Single(format!("{domain}:{port}")));
        }
    }

    /// Every host, manifest order
    pub fn hosts(&self) -> &[IpAddr] {
        &self.order
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.hosts.contains_key(&addr)
    }

    pub fn get(&self, addr: IpAddr) -> Option<&ManagedHost> {
        self.hosts.get(&addr)
    }

    pub fn by_role(&self, role: Role) -> &[IpAddr] {
        self.roles.get(&role).map_or(&[], Vec::as_slice)
    }

    pub fn masters(&self) -> &[IpAddr] {
        self.by_role(Role::Master)
    }

    pub fn workers(&self) -> &[IpAddr] {
        self.by_role(Role::Worker)
    }

    /// The bootstrap master (master-zero)
    pub fn primary_master(&self) -> Option<IpAddr> {
        self.primary
    }

    /// Masters other than the primary
    pub fn secondary_masters(&self) -> Vec<IpAddr> {
        self.masters()
            .iter()
            .copied()
            .filter(|m| Some(*m) != self.primary)
            .collect()
    }

    pub fn is_ipv6(&self) -> bool {
        self.order.first().is_some_and(IpAddr::is_ipv6)
    }

    pub fn endpoint(&self, addr: IpAddr) -> Option<Endpoint> {
        self.hosts.get(&addr).map(|h| Endpoint {
            addr,
            credentials: Arc::clone(&h.credentials),
        })
    }

    /// Cluster-wide env including registry and address-family entries
    pub fn cluster_env(&self) -> &BTreeMap<String, EnvValue> {
        &self.cluster_env
    }

    /// Effective env of one host: cluster env, host overrides, `HostIP`
    pub fn host_env(&self, addr: IpAddr) -> BTreeMap<String, EnvValue> {
        let mut env = match self.hosts.get(&addr) {
            Some(host) => merge_env(&host.env, &self.cluster_env),
            None => self.cluster_env.clone(),
        };
        env.entry(HOST_IP_KEY.to_string())
            .or_insert_with(|| EnvValue::Single(addr.to_string()));
        env
    }

    pub fn registry(&self) -> &RegistrySpec {
        &self.registry
    }

    pub fn host_aliases(&self) -> &[HostAlias] {
        &self.host_aliases
    }

    /// New inventory with `addrs` added to `role`. An address that already
    /// holds `role` is rejected; one that holds the other role gains `role`.
    pub fn with_hosts(&self, role: Role, addrs: &[IpAddr], ssh: &SshSpec) -> Result<Self, DriverError> {
        let mut seen = HashSet::new();
        for addr in addrs {
            if !seen.insert(*addr) {
                return Err(DriverError::InvalidConfig(format!(
                    "host {addr} is listed more than once"
                )));
            }
            if self.hosts.get(addr).is_some_and(|h| h.has_role(role)) {
                return Err(DriverError::InvalidConfig(format!(
                    "host {addr} is already a {role}"
                )));
            }
        }

        let mut next = self.clone();
        if addrs.is_empty() {
            return Ok(next);
        }
        let credentials = Arc::new(SshCredentials::from_spec(&ssh.merged_with(&self.ssh_defaults))?);
        for addr in addrs {
            match next.hosts.get_mut(addr) {
                Some(host) => {
                    host.roles.insert(role);
                }
                None => {
                    next.order.push(*addr);
                    next.hosts.insert(
                        *addr,
                        ManagedHost {
                            addr: *addr,
                            roles: BTreeSet::from([role]),
                            credentials: Arc::clone(&credentials),
                            env: BTreeMap::new(),
                            labels: BTreeMap::new(),
                            taints: Vec::new(),
                            source: HostSpec {
                                ssh: ssh.clone(),
                                ..HostSpec::default()
                            },
                        },
                    );
                }
            }
        }
        next.check_family()?;
        next.rebuild_index();
        Ok(next)
    }

    /// New inventory with `addrs` removed from `role`. Hosts left without a
    /// role leave the inventory. Removing every master is rejected.
    pub fn without_hosts(&self, role: Role, addrs: &[IpAddr]) -> Result<Self, DriverError> {
        for addr in addrs {
            if !self.by_role(role).contains(addr) {
                return Err(DriverError::InvalidConfig(format!("host {addr} is not a {role}")));
            }
        }

        let mut next = self.clone();
        for addr in addrs {
            let now_empty = match next.hosts.get_mut(addr) {
                Some(host) => {
                    host.roles.remove(&role);
                    host.roles.is_empty()
                }
                None => false,
            };
            if now_empty {
                next.hosts.remove(addr);
                next.order.retain(|a| a != addr);
            }
        }
        next.rebuild_index();
        if next.masters().is_empty() {
            return Err(DriverError::InvalidConfig(
                "cannot remove every master from the cluster".to_string(),
            ));
        }
        Ok(next)
    }

    /// Host groups for writing the inventory back to the manifest.
    /// Consecutive hosts with identical settings share a group.
    pub fn to_host_specs(&self) -> Vec<HostSpec> {
        let mut groups: Vec<HostSpec> = Vec::new();
        for addr in &self.order {
            let Some(host) = self.hosts.get(addr) else {
                continue;
            };
            let roles: Vec<Role> = host.roles.iter().copied().collect();
            match groups.last_mut() {
                Some(last) if last.roles == roles && same_settings(last, &host.source) => {
                    last.ips.push(addr.to_string());
                }
                _ => groups.push(HostSpec {
                    ips: vec![addr.to_string()],
                    roles,
                    ..host.source.clone()
                }),
            }
        }
        groups
    }
}

fn same_settings(a: &HostSpec, b: &HostSpec) -> bool {
    a.ssh == b.ssh && a.env == b.env && a.labels == b.labels && a.taints == b.taints
}

fn parse_addr(raw: &str) -> Result<IpAddr, DriverError> {
    raw.trim()
        .parse()
        .map_err(|_| DriverError::InvalidConfig(format!("invalid host address {raw:?}")))
}

/// Fill registry defaults. With neither registry configured a local one at
/// `sea.hub:5000` is assumed.
fn normalize_registry(spec: &RegistrySpec) -> Result<RegistrySpec, DriverError> {
    let mut registry = spec.clone();

    if let Some(external) = &registry.external_registry
        && external.domain.trim().is_empty()
    {
        return Err(DriverError::InvalidConfig(
            "external registry needs a domain".to_string(),
        ));
    }

    match &mut registry.local_registry {
        Some(local) => {
            if local.config.domain.trim().is_empty() {
                local.config.domain = DEFAULT_REGISTRY_DOMAIN.to_string();
            }
            if local.config.port == 0 {
                local.config.port = DEFAULT_REGISTRY_PORT;
            }
        }
        None if registry.external_registry.is_none() => {
            registry.local_registry = Some(LocalRegistry {
                config: RegistryConfig {
                    domain: DEFAULT_REGISTRY_DOMAIN.to_string(),
                    port: DEFAULT_REGISTRY_PORT,
                    ..RegistryConfig::default()
                },
                ..LocalRegistry::default()
            });
        }
        None => {}
    }

    Ok(registry)
}
