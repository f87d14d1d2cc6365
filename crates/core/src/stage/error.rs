//! Error types for the stage module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing or finishing a stage attempt.
///
/// These never leave the runner; they are folded into a
/// [`StageOutcome`](super::StageOutcome).
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage has an empty command")]
    EmptyCommand,

    #[error("failed to create working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create product directory {path}: {source}")]
    ProductDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StageError {
    pub fn move_failed(from: PathBuf, to: PathBuf, source: std::io::Error) -> Self {
        Self::Move { from, to, source }
    }

    /// Whether the process ran but its artifacts could not be put in place.
    pub fn is_placement(&self) -> bool {
        matches!(self, Self::Move { .. } | Self::ProductDir { .. })
    }
}
