//! Orchestrator configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the pass orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable/disable the background loop.
    /// When disabled, passes only advance through explicit ticks.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often the loop ticks without being notified (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Maximum stage attempts running at once, across all passes.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_stages: usize,

    /// Root of the per-pass working directories.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// How long a finished pass keeps its working directory (seconds).
    #[serde(default = "default_retention")]
    pub working_dir_retention_secs: u64,

    /// Buffer of the pass report broadcast channel.
    #[serde(default = "default_report_capacity")]
    pub report_channel_capacity: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    1000 // 1 second
}

fn default_max_concurrent() -> usize {
    2
}

fn default_work_root() -> PathBuf {
    PathBuf::from("/var/lib/modis-runner/work")
}

fn default_retention() -> u64 {
    3600 // 1 hour
}

fn default_report_capacity() -> usize {
    64
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tick_interval_ms: default_tick_interval(),
            max_concurrent_stages: default_max_concurrent(),
            work_root: default_work_root(),
            working_dir_retention_secs: default_retention(),
            report_channel_capacity: default_report_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn with_max_concurrent_stages(mut self, max: usize) -> Self {
        self.max_concurrent_stages = max;
        self
    }

    pub fn with_retention(mut self, secs: u64) -> Self {
        self.working_dir_retention_secs = secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Backoff between attempts of a failed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// 1.0 gives a fixed delay.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_delay() -> u64 {
    30
}

fn default_max_delay() -> u64 {
    600 // 10 minutes
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Retries immediately.
    pub fn immediate() -> Self {
        Self {
            initial_delay_secs: 0,
            max_delay_secs: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> chrono::Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay_secs as f64 * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay_secs as f64).max(0.0);
        chrono::Duration::milliseconds((capped * 1000.0) as i64)
    }
}
