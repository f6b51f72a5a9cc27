//! Kubernetes version ordering.

use std::fmt;
use std::str::FromStr;

/// `vMAJOR.MINOR.PATCH`, optionally with a pre-release suffix that is ignored
/// for ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid kubernetes version {0:?}")]
pub struct InvalidVersion(pub String);

impl FromStr for KubeVersion {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = bare.split_once('-').map_or(bare, |(core, _)| core);

        let mut parts = core.split('.').map(|p| p.parse::<u32>().map_err(|_| invalid()));
        let version = Self {
            major: parts.next().ok_or_else(invalid)??,
            minor: parts.next().ok_or_else(invalid)??,
            patch: parts.next().ok_or_else(invalid)??,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl KubeVersion {
    pub fn is_at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

/// `given >= current`. A malformed version on either side never compares
/// greater-or-equal.
pub fn is_not_older(given: &str, current: &str) -> bool {
    match (given.parse::<KubeVersion>(), current.parse::<KubeVersion>()) {
        (Ok(g), Ok(c)) => g >= c,
        _ => false,
    }
}
