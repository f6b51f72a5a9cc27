//! Per-host outcomes of a concurrent batch

use std::net::IpAddr;

use crate::error::{BatchError, DriverError, HostFailure};

/// Outcome of one host inside a batch
#[derive(Debug)]
pub struct HostOutcome {
    /// Target host
    pub host: IpAddr,
    /// `Err` when the task failed, timed out or the host is not managed
    pub result: Result<(), DriverError>,
}

/// Complete per-host outcome list of one batch, in the order the hosts were
/// given
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<HostOutcome>,
}

impl BatchReport {
    /// Report over `outcomes`, kept in the given order
    pub fn new(outcomes: Vec<HostOutcome>) -> Self {
        Self { outcomes }
    }

    /// Every outcome, successes included
    pub fn outcomes(&self) -> &[HostOutcome] {
        &self.outcomes
    }

    /// Consume the report for its outcomes
    pub fn into_outcomes(self) -> Vec<HostOutcome> {
        self.outcomes
    }

    /// True when no host failed. An empty batch succeeds.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Hosts whose task returned `Ok`
    pub fn succeeded(&self) -> Vec<IpAddr> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.host)
            .collect()
    }

    /// Hosts whose task returned `Err`
    pub fn failed(&self) -> Vec<IpAddr> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.host)
            .collect()
    }

    /// `Ok` when every host succeeded, otherwise every failure
    pub fn into_result(self) -> Result<(), BatchError> {
        let attempted = self.outcomes.len();
        let failures: Vec<HostFailure> = self
            .outcomes
            .into_iter()
            .filter_map(|o| o.result.err().map(|error| HostFailure { host: o.host, error }))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BatchError::new(failures, attempted))
        }
    }
}
