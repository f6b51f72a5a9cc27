//! Environment variables declared in the cluster manifest.
//!
//! Entries are `KEY=VALUE`. A value containing `;` is a list. Host-level
//! entries override cluster-level ones with the same key.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::DriverError;
use crate::shellcommand::shell_quote;

/// Key under which every host sees its own address
pub const HOST_IP_KEY: &str = "HostIP";
/// Set cluster-wide when the hosts are IPv6
pub const HOST_IP_FAMILY_KEY: &str = "HostIPFamily";
/// Keys filled in from the registry section
pub const REGISTRY_DOMAIN_KEY: &str = "RegistryDomain";
pub const REGISTRY_PORT_KEY: &str = "RegistryPort";
pub const REGISTRY_URL_KEY: &str = "RegistryURL";

/// Value of one env entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Single(String),
    /// Rendered space-separated
    List(Vec<String>),
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => f.write_str(v),
            Self::List(items) => f.write_str(&items.join(" ")),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

/// Shell variable name: `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse `KEY=VALUE` entries. Entries without `=` or with an empty key are
/// skipped. A later duplicate key wins. A key that is not a shell variable
/// name is rejected.
pub fn parse_env(entries: &[String]) -> Result<BTreeMap<String, EnvValue>, DriverError> {
    let mut env = BTreeMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if !is_env_key(key) {
            return Err(DriverError::InvalidConfig(format!("invalid env key {key:?}")));
        }
        let value = if value.contains(';') {
            EnvValue::List(
                value
                    .split(';')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        } else {
            EnvValue::Single(value.to_string())
        };
        env.insert(key.to_string(), value);
    }
    Ok(env)
}

/// Overlay `host` on top of `cluster`
pub fn merge_env(
    host: &BTreeMap<String, EnvValue>,
    cluster: &BTreeMap<String, EnvValue>,
) -> BTreeMap<String, EnvValue> {
    let mut merged = cluster.clone();
    for (k, v) in host {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// `export K='v'; ...` prefix so a remote script sees the env. Keys that
/// are not shell variable names are left out.
pub fn render_exports(env: &BTreeMap<String, EnvValue>) -> String {
    env.iter()
        .filter(|(k, _)| is_env_key(k))
        .map(|(k, v)| format!("export {k}={}; ", shell_quote(&v.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_env_single_and_list() {
        let env = parse_env(&entries(&["PodCIDR=100.64.0.0/10", "DNS=1.1.1.1;8.8.8.8", "garbage"])).unwrap();

        assert_eq!(env.len(), 2);
        assert_eq!(env["PodCIDR"], EnvValue::from("100.64.0.0/10"));
        assert_eq!(
            env["DNS"],
            EnvValue::List(vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()])
        );
        assert_eq!(env["DNS"].to_string(), "1.1.1.1 8.8.8.8");
    }

    #[test]
    fn test_host_env_overrides_cluster_env() {
        let cluster = parse_env(&entries(&["A=cluster", "B=cluster"])).unwrap();
        let host = parse_env(&entries(&["B=host"])).unwrap();

        let merged = merge_env(&host, &cluster);
        assert_eq!(merged["A"], EnvValue::from("cluster"));
        assert_eq!(merged["B"], EnvValue::from("host"));
    }

    #[test]
    fn test_render_exports_quotes_values() {
        let env = parse_env(&entries(&["Msg=it's"])).unwrap();
        assert_eq!(render_exports(&env), "export Msg='it'\\''s'; ");
    }

    #[test]
    fn test_env_keys_must_be_shell_names() {
        for key in ["HostIP", "_private", "POD_CIDR2"] {
            assert!(is_env_key(key), "{key}");
        }
        for key in ["2FAST", "A-B", "X;reboot", "$(id)", "a b"] {
            assert!(!is_env_key(key), "{key}");
        }

        let err = parse_env(&entries(&["PodCIDR=100.64.0.0/10", "X;reboot;Y=1"])).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(msg) if msg.contains("X;reboot;Y")));
    }

    #[test]
    fn test_render_exports_leaves_out_unsafe_keys() {
        let mut env = BTreeMap::new();
        env.insert("Good".to_string(), EnvValue::from("1"));
        env.insert("rm -rf /;X".to_string(), EnvValue::from("2"));

        assert_eq!(render_exports(&env), "export Good='1'; ");
    }
}
