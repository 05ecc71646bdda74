//! Smoke-test timing
//!
//! All durations are stored as milliseconds so the TOML stays readable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing parameters of the conformance scenarios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Timeout of the wait that is expected to time out
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,
    /// Allowed overshoot of a timed-out wait, as a fraction of the timeout
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Time allowed for a matching edge to arrive
    #[serde(default = "default_edge_timeout")]
    pub edge_timeout_ms: u64,
    /// Window in which a non-matching edge must not be delivered
    #[serde(default = "default_negative_window")]
    pub negative_window_ms: u64,
    /// Delay before the halting thread fires
    #[serde(default = "default_halt_after")]
    pub halt_after_ms: u64,
    /// Timeout of the wait that gets halted
    #[serde(default = "default_halt_wait")]
    pub halt_wait_ms: u64,
    /// How long after `halt()` the halted wait may return
    #[serde(default = "default_halt_slack")]
    pub halt_slack_ms: u64,
    /// Settle delay after swapping line roles
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

fn default_wait_timeout() -> u64 {
    5000
}

fn default_tolerance() -> f64 {
    0.1
}

fn default_edge_timeout() -> u64 {
    1000
}

fn default_negative_window() -> u64 {
    250
}

fn default_halt_after() -> u64 {
    3000
}

fn default_halt_wait() -> u64 {
    30000
}

fn default_halt_slack() -> u64 {
    500
}

fn default_settle() -> u64 {
    500
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout(),
            tolerance: default_tolerance(),
            edge_timeout_ms: default_edge_timeout(),
            negative_window_ms: default_negative_window(),
            halt_after_ms: default_halt_after(),
            halt_wait_ms: default_halt_wait(),
            halt_slack_ms: default_halt_slack(),
            settle_ms: default_settle(),
        }
    }
}

impl TimingConfig {
    /// Short timings for simulated runs
    pub fn quick() -> Self {
        Self {
            wait_timeout_ms: 200,
            tolerance: 0.5,
            edge_timeout_ms: 200,
            negative_window_ms: 50,
            halt_after_ms: 100,
            halt_wait_ms: 5000,
            halt_slack_ms: 400,
            settle_ms: 10,
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Latest acceptable return of a wait that should time out
    pub fn wait_timeout_limit(&self) -> Duration {
        self.wait_timeout().mul_f64(1.0 + self.tolerance)
    }

    pub fn edge_timeout(&self) -> Duration {
        Duration::from_millis(self.edge_timeout_ms)
    }

    pub fn negative_window(&self) -> Duration {
        Duration::from_millis(self.negative_window_ms)
    }

    pub fn halt_after(&self) -> Duration {
        Duration::from_millis(self.halt_after_ms)
    }

    pub fn halt_wait(&self) -> Duration {
        Duration::from_millis(self.halt_wait_ms)
    }

    /// Latest acceptable return of the halted wait, measured from the halt
    pub fn halt_latency(&self) -> Duration {
        Duration::from_millis(self.halt_slack_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.wait_timeout(), Duration::from_secs(5));
        assert_eq!(timing.wait_timeout_limit(), Duration::from_millis(5500));
        assert_eq!(timing.halt_latency(), Duration::from_millis(500));
        assert_eq!(timing.edge_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_table() {
        let timing: TimingConfig = toml::from_str("settle_ms = 20").unwrap();
        assert_eq!(timing.settle(), Duration::from_millis(20));
        assert_eq!(timing.halt_wait_ms, 30000);
    }
}
