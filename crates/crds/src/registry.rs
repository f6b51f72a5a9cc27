//! Registry configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Domain of the registry served from inside the cluster
pub const DEFAULT_REGISTRY_DOMAIN: &str = "sea.hub";

/// Port of the registry served from inside the cluster
pub const DEFAULT_REGISTRY_PORT: u16 = 5000;

/// Registry configuration. When neither registry is set, a local registry
/// at `sea.hub:5000` is assumed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Registry deployed by the cluster image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_registry: Option<LocalRegistry>,

    /// Registry hosted outside the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_registry: Option<RegistryConfig>,
}

/// Connection details shared by both registry kinds
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Registry domain
    #[serde(default)]
    pub domain: String,

    /// Registry port (0 means unset)
    #[serde(default)]
    pub port: u16,

    /// Basic auth user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Registry deployed on the cluster hosts
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalRegistry {
    /// Connection details
    #[serde(flatten)]
    pub config: RegistryConfig,

    /// Serve plain HTTP
    #[serde(default)]
    pub insecure_mode: bool,

    /// Run a registry replica on every master
    #[serde(default)]
    pub ha_mode: bool,
}

impl RegistrySpec {
    /// Domain and port of the effective registry. The local registry wins when
    /// both are configured.
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        if let Some(local) = &self.local_registry {
            return Some((local.config.domain.as_str(), local.config.port));
        }
        self.external_registry
            .as_ref()
            .map(|ext| (ext.domain.as_str(), ext.port))
    }
}
