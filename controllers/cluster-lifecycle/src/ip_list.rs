//! Host list arguments: `10.0.0.2,10.0.0.3` or `10.0.0.2-10.0.0.9`, mixed freely.

use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ControllerError;

/// Largest number of addresses a single range may expand to
pub const MAX_RANGE_LEN: u128 = 1024;

/// Ordered, de-duplicated list of host addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpList(pub Vec<IpAddr>);

impl IpList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for IpList {
    type Err = ControllerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut addrs: Vec<IpAddr> = Vec::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            for addr in expand(item)? {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
        Ok(Self(addrs))
    }
}

fn parse_addr(raw: &str) -> Result<IpAddr, ControllerError> {
    raw.trim()
        .parse()
        .map_err(|_| ControllerError::InvalidAddress(raw.trim().to_string()))
}

/// One address, or every address from `start` to `end` inclusive
fn expand(item: &str) -> Result<Vec<IpAddr>, ControllerError> {
    // IPv6 addresses contain no '-', so splitting on it is unambiguous
    let Some((start, end)) = item.split_once('-') else {
        return Ok(vec![parse_addr(item)?]);
    };
    let (start, end) = (parse_addr(start)?, parse_addr(end)?);
    let invalid = || ControllerError::InvalidRange(item.to_string());

    let (lo, hi) = match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => (u128::from(u32::from(s)), u128::from(u32::from(e))),
        (IpAddr::V6(s), IpAddr::V6(e)) => (u128::from(s), u128::from(e)),
        _ => return Err(invalid()),
    };
    if hi < lo {
        return Err(invalid());
    }
    if hi - lo >= MAX_RANGE_LEN {
        return Err(ControllerError::RangeTooLarge {
            range: item.to_string(),
            max: MAX_RANGE_LEN,
        });
    }

    (lo..=hi)
        .map(|n| match start {
            IpAddr::V4(_) => u32::try_from(n).map(|n| IpAddr::from(n.to_be_bytes())).map_err(|_| invalid()),
            IpAddr::V6(_) => Ok(IpAddr::from(n.to_be_bytes())),
        })
        .collect()
}
