//! Host groups, roles and SSH credentials.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH user
pub const DEFAULT_SSH_USER: &str = "root";

/// Role a host holds in the cluster. A host may hold several.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Control-plane host
    #[serde(rename = "master")]
    Master,

    /// Worker host
    #[serde(rename = "node")]
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Worker => f.write_str("node"),
        }
    }
}

/// A group of hosts sharing roles, credentials and metadata
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    /// Host addresses (IPv4 or IPv6; one family per cluster)
    pub ips: Vec<String>,

    /// Roles held by every address in this group
    pub roles: Vec<Role>,

    /// Per-group SSH overrides
    #[serde(default)]
    pub ssh: SshSpec,

    /// Per-group environment overriding the cluster env
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Node taints in `key=value:Effect` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<String>,
}

/// SSH connection settings. Unset fields fall back to the cluster defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshSpec {
    /// Login user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Login password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,

    /// Path to the private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<String>,

    /// Private key passphrase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_passwd: Option<String>,

    /// SSH port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl SshSpec {
    /// Fill every unset field from `defaults`
    #[must_use]
    pub fn merged_with(&self, defaults: &SshSpec) -> SshSpec {
        SshSpec {
            user: self.user.clone().or_else(|| defaults.user.clone()),
            passwd: self.passwd.clone().or_else(|| defaults.passwd.clone()),
            pk: self.pk.clone().or_else(|| defaults.pk.clone()),
            pk_passwd: self.pk_passwd.clone().or_else(|| defaults.pk_passwd.clone()),
            port: self.port.or(defaults.port),
        }
    }
}

/// Extra `/etc/hosts` entry
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostAlias {
    /// Address the hostnames resolve to
    pub ip: String,

    /// Hostnames
    pub hostnames: Vec<String>,
}
