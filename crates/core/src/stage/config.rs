//! Configuration for the stage runner.

use serde::{Deserialize, Serialize};

/// Configuration for [`ProcessStageRunner`](super::ProcessStageRunner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRunnerConfig {
    /// Lines of stdout/stderr kept per stream for failure diagnostics.
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,

    /// Log every output line of the external program.
    #[serde(default = "default_log_output")]
    pub log_output: bool,

    /// How long to wait for output readers after the process exits (seconds).
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_capture_lines() -> usize {
    50
}

fn default_log_output() -> bool {
    true
}

fn default_drain_timeout() -> u64 {
    5
}

impl Default for StageRunnerConfig {
    fn default() -> Self {
        Self {
            capture_lines: default_capture_lines(),
            log_output: default_log_output(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}
