//! Poll scheduling for one dashboard row.
//!
//! The next delay depends on the outcome of the previous fetch. Two failures
//! in a row put the row into a degraded mode that only a remount clears.

use crate::api::ServerStats;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub retry_interval: Duration,
    /// Consecutive failures that put the row into degraded mode
    pub max_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30_000),
            retry_interval: Duration::from_millis(5_000),
            max_failures: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollDecision {
    After(Duration),
    Stop,
}

/// Row conditions under which no polling happens at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RowGate {
    pub suspended: bool,
    pub node_offline: bool,
    pub transferring: bool,
}

impl RowGate {
    pub fn allows_polling(&self) -> bool {
        !(self.suspended || self.node_offline || self.transferring)
    }
}

/// What a row should display.
#[derive(Clone, Debug, PartialEq)]
pub enum RowStatus {
    Suspended,
    Transferring,
    NodeOffline,
    /// No result yet
    Loading,
    Live(ServerStats),
    /// Degraded after repeated failures
    AssumeOffline,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollState {
    failures: u32,
    degraded: bool,
    last: Option<ServerStats>,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn last(&self) -> Option<&ServerStats> {
        self.last.as_ref()
    }

    /// A successful fetch resets the failure count. Polling stops if the
    /// server turned out to be suspended.
    pub fn record_success(&mut self, stats: ServerStats, config: &PollConfig) -> PollDecision {
        self.failures = 0;
        self.degraded = false;
        let suspended = stats.is_suspended;
        self.last = Some(stats);
        if suspended {
            PollDecision::Stop
        } else {
            PollDecision::After(config.interval)
        }
    }

    pub fn record_failure(&mut self, config: &PollConfig) -> PollDecision {
        self.failures += 1;
        if self.failures >= config.max_failures {
            self.degraded = true;
            PollDecision::Stop
        } else {
            PollDecision::After(config.retry_interval)
        }
    }

    pub fn display(&self, gate: RowGate) -> RowStatus {
        if gate.suspended || self.last.as_ref().is_some_and(|s| s.is_suspended) {
            return RowStatus::Suspended;
        }
        if gate.transferring {
            return RowStatus::Transferring;
        }
        if gate.node_offline {
            return RowStatus::NodeOffline;
        }
        if self.degraded {
            return RowStatus::AssumeOffline;
        }
        match &self.last {
            Some(stats) => RowStatus::Live(stats.clone()),
            None => RowStatus::Loading,
        }
    }
}
