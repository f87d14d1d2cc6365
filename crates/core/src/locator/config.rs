//! File locator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for input discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// How long a stage may wait for its inputs to appear once it becomes
    /// eligible (seconds). After this, missing inputs fail the pass.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

fn default_grace_period() -> u64 {
    600 // 10 minutes
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
        }
    }
}

impl LocatorConfig {
    pub fn with_grace_period(mut self, secs: u64) -> Self {
        self.grace_period_secs = secs;
        self
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_period_secs as i64)
    }
}
