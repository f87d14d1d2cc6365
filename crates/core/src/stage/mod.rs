//! Stage execution.
//!
//! A stage is one external processing program (Level-1A decode, geolocation,
//! Level-1B calibration, destriping). The orchestrator only sees the
//! [`StageRunner`] trait; [`ProcessStageRunner`] is the production
//! implementation and tests substitute a scripted fake.
//!
//! # Outcome classification
//!
//! - Accepted exit code with a new artifact → [`StageOutcome::Completed`]
//! - Accepted exit code without artifact → [`StageOutcome::ArtifactMissing`]
//! - Other exit codes → [`StageOutcome::NonZeroExit`]
//! - Deadline reached → [`StageOutcome::TimedOut`] (the process group is killed)
//! - Program missing or not executable → [`StageOutcome::LaunchError`]

mod config;
mod error;
mod process;
mod traits;
mod types;

pub use config::StageRunnerConfig;
pub use error::StageError;
pub use process::ProcessStageRunner;
pub use traits::StageRunner;
pub use types::{LaunchErrorKind, StageOutcome, StageRequest};
