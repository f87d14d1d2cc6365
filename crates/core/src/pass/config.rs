//! Pass tracker configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Configuration for pass correlation and staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tolerance before the first announced start time (seconds).
    #[serde(default = "default_nudge")]
    pub start_nudge_secs: u64,

    /// Tolerance after the first announced start time (seconds).
    #[serde(default = "default_nudge")]
    pub end_nudge_secs: u64,

    /// Passes idle for longer than this are abandoned (seconds).
    #[serde(default = "default_staleness_horizon")]
    pub staleness_horizon_secs: u64,

    /// How often the staleness sweep runs (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long a finished pass blocks re-creation by late duplicates (seconds).
    #[serde(default = "default_recent_horizon")]
    pub recent_horizon_secs: u64,
}

fn default_nudge() -> u64 {
    300 // 5 minutes
}

fn default_staleness_horizon() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_recent_horizon() -> u64 {
    300 // 5 minutes
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            start_nudge_secs: default_nudge(),
            end_nudge_secs: default_nudge(),
            staleness_horizon_secs: default_staleness_horizon(),
            sweep_interval_secs: default_sweep_interval(),
            recent_horizon_secs: default_recent_horizon(),
        }
    }
}

impl TrackerConfig {
    /// Sets both nudges.
    pub fn with_nudges(mut self, start_secs: u64, end_secs: u64) -> Self {
        self.start_nudge_secs = start_secs;
        self.end_nudge_secs = end_secs;
        self
    }

    /// Sets the staleness horizon.
    pub fn with_staleness_horizon(mut self, secs: u64) -> Self {
        self.staleness_horizon_secs = secs;
        self
    }

    pub fn start_nudge(&self) -> Duration {
        Duration::seconds(self.start_nudge_secs as i64)
    }

    pub fn end_nudge(&self) -> Duration {
        Duration::seconds(self.end_nudge_secs as i64)
    }

    pub fn staleness_horizon(&self) -> Duration {
        Duration::seconds(self.staleness_horizon_secs as i64)
    }

    pub fn recent_horizon(&self) -> Duration {
        Duration::seconds(self.recent_horizon_secs as i64)
    }
}
