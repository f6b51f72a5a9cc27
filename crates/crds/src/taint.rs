//! Taint string parsing.
//!
//! Hosts declare taints as `key=value:Effect` or `key:Effect`, the same syntax
//! `kubectl taint` accepts.

use k8s_openapi::api::core::v1::Taint;
use thiserror::Error;

/// Taint effects accepted by the kubelet
pub const TAINT_EFFECTS: [&str; 3] = ["NoSchedule", "PreferNoSchedule", "NoExecute"];

/// Errors raised while parsing a taint string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaintError {
    /// No `:Effect` suffix
    #[error("taint {0:?} is missing an effect")]
    MissingEffect(String),

    /// Effect not one of NoSchedule, PreferNoSchedule, NoExecute
    #[error("taint {0:?} has unknown effect {1:?}")]
    UnknownEffect(String, String),

    /// Empty key
    #[error("taint {0:?} has an empty key")]
    EmptyKey(String),
}

/// Parse `key=value:Effect` or `key:Effect` into a [`Taint`].
pub fn parse_taint(raw: &str) -> Result<Taint, TaintError> {
    let raw = raw.trim();
    let (key_value, effect) = raw
        .rsplit_once(':')
        .ok_or_else(|| TaintError::MissingEffect(raw.to_string()))?;

    if !TAINT_EFFECTS.contains(&effect) {
        return Err(TaintError::UnknownEffect(raw.to_string(), effect.to_string()));
    }

    let (key, value) = match key_value.split_once('=') {
        Some((k, v)) => (k, Some(v.to_string())),
        None => (key_value, None),
    };

    if key.is_empty() {
        return Err(TaintError::EmptyKey(raw.to_string()));
    }

    Ok(Taint {
        key: key.to_string(),
        value,
        effect: effect.to_string(),
        time_added: None,
    })
}

/// Parse every taint string, stopping at the first malformed one.
pub fn parse_taints(raw: &[String]) -> Result<Vec<Taint>, TaintError> {
    raw.iter().map(|t| parse_taint(t)).collect()
}
