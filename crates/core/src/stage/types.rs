//! Stage runner types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pass::PassId;

/// One attempt of one stage, fully expanded.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub pass_id: PassId,
    pub stage: String,
    pub attempt: u32,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub work_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Absolute glob patterns the stage must produce.
    pub outputs: Vec<String>,
    pub timeout: Duration,
    pub success_exit_codes: Vec<i32>,
    /// Artifacts are moved here after success when set.
    pub product_dir: Option<PathBuf>,
}

impl StageRequest {
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

/// Why a stage could not be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchErrorKind {
    NotFound,
    PermissionDenied,
    Other,
}

impl LaunchErrorKind {
    pub fn from_io(e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Other,
        }
    }
}

/// Classified result of one stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Exit code accepted and at least one new artifact found.
    Completed { artifacts: Vec<PathBuf> },
    TimedOut,
    NonZeroExit { code: i32 },
    /// Exit code accepted but no declared output appeared.
    ArtifactMissing,
    LaunchError {
        kind: LaunchErrorKind,
        message: String,
    },
    /// Stopped by an abort.
    Cancelled,
}

impl StageOutcome {
    pub fn completed(artifacts: Vec<PathBuf>) -> Self {
        Self::Completed { artifacts }
    }

    pub fn launch_error(kind: LaunchErrorKind, message: impl Into<String>) -> Self {
        Self::LaunchError {
            kind,
            message: message.into(),
        }
    }

    /// Label for logging and metrics.
    pub fn outcome_type(&self) -> &'static str {
        match self {
            StageOutcome::Completed { .. } => "completed",
            StageOutcome::TimedOut => "timed_out",
            StageOutcome::NonZeroExit { .. } => "non_zero_exit",
            StageOutcome::ArtifactMissing => "artifact_missing",
            StageOutcome::LaunchError { .. } => "launch_error",
            StageOutcome::Cancelled => "cancelled",
        }
    }

    /// Failures that may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StageOutcome::TimedOut
                | StageOutcome::NonZeroExit { .. }
                | StageOutcome::ArtifactMissing
        )
    }

    /// Human-readable failure reason.
    pub fn describe(&self) -> String {
        match self {
            StageOutcome::Completed { artifacts } => {
                format!("completed with {} artifact(s)", artifacts.len())
            }
            StageOutcome::TimedOut => "timed out".to_string(),
            StageOutcome::NonZeroExit { code } => format!("exited with code {}", code),
            StageOutcome::ArtifactMissing => "no output artifact produced".to_string(),
            StageOutcome::LaunchError { kind, message } => {
                format!("launch failed ({:?}): {}", kind, message)
            }
            StageOutcome::Cancelled => "cancelled".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StageOutcome::TimedOut.is_transient());
        assert!(StageOutcome::NonZeroExit { code: 2 }.is_transient());
        assert!(StageOutcome::ArtifactMissing.is_transient());
        assert!(!StageOutcome::launch_error(LaunchErrorKind::NotFound, "x").is_transient());
        assert!(!StageOutcome::Cancelled.is_transient());
        assert!(!StageOutcome::completed(vec![]).is_transient());
    }

    #[test]
    fn test_launch_error_kind_from_io() {
        let e = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(LaunchErrorKind::from_io(&e), LaunchErrorKind::PermissionDenied);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(StageOutcome::NonZeroExit { code: 3 }).unwrap();
        assert_eq!(json["outcome"], "non_zero_exit");
        assert_eq!(json["code"], 3);
    }
}
