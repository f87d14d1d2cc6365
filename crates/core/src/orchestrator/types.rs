//! Types for the pass orchestrator.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pass::{Ingest, Pass, PassId, PassStatus, Platform, StageRecord, StageState};
use crate::stage::StageOutcome;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Pass not found among live passes.
    #[error("pass not found: {0}")]
    PassNotFound(PassId),

    /// The pass already reached a terminal status.
    #[error("pass {pass_id} already {status}")]
    AlreadyFinished { pass_id: PassId, status: String },

    /// No pipeline is configured for the platform.
    #[error("no pipeline configured for {0}")]
    MissingPipeline(Platform),
}

/// How a failure or non-event is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage will be retried; invisible outside the orchestrator.
    TransientStageFailure,
    /// The pass cannot complete.
    PermanentPassFailure,
    /// A repeated announcement merged into an existing pass.
    DuplicateEventIgnored,
    /// The pass stopped receiving updates and was dropped.
    StaleTriggerAbandoned,
}

impl FailureKind {
    /// Classifies a stage outcome. `retries_left` is whether another attempt is allowed.
    pub fn of_outcome(outcome: &StageOutcome, retries_left: bool) -> Option<Self> {
        match outcome {
            StageOutcome::Completed { .. } | StageOutcome::Cancelled => None,
            StageOutcome::LaunchError { .. } => Some(Self::PermanentPassFailure),
            _ if outcome.is_transient() && retries_left => Some(Self::TransientStageFailure),
            _ => Some(Self::PermanentPassFailure),
        }
    }

    pub fn of_ingest(ingest: &Ingest) -> Option<Self> {
        match ingest {
            Ingest::Merged {
                new_file: false, ..
            } => Some(Self::DuplicateEventIgnored),
            _ => None,
        }
    }
}

/// Final report of one pass. Exactly one is sent per pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass_id: PassId,
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit_number: Option<u32>,
    pub status: PassStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub stages: Vec<StageRecord>,
    /// Artifacts of every succeeded stage, by stage name.
    pub artifacts: BTreeMap<String, Vec<PathBuf>>,
    pub created_at: DateTime<Utc>,
    /// Last time the pass changed before it finished.
    pub last_updated_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    pub fn from_pass(pass: &Pass, finished_at: DateTime<Utc>) -> Self {
        let failure = match pass.status {
            PassStatus::Failed { .. } => Some(FailureKind::PermanentPassFailure),
            PassStatus::Abandoned => Some(FailureKind::StaleTriggerAbandoned),
            _ => None,
        };
        let artifacts = pass
            .stages
            .iter()
            .filter_map(|s| match &s.state {
                StageState::Succeeded { artifacts } => Some((s.name.clone(), artifacts.clone())),
                _ => None,
            })
            .collect();

        Self {
            pass_id: pass.id.clone(),
            platform: pass.platform,
            start_time: pass.start_time,
            orbit_number: pass.orbit_number,
            status: pass.status.clone(),
            failure,
            stages: pass.stages.clone(),
            artifacts,
            created_at: pass.created_at,
            last_updated_at: pass.last_updated_at,
            finished_at,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.created_at).num_milliseconds().max(0) as u64
    }

    pub fn stages_succeeded(&self) -> u32 {
        self.stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Succeeded { .. }))
            .count() as u32
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    /// Stage completions applied.
    pub completed: usize,
    /// Stage attempts launched.
    pub dispatched: usize,
    /// Passes that reached a terminal status.
    pub finished: usize,
    /// Working directories removed.
    pub cleaned: usize,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the background loop is running.
    pub running: bool,
    /// Passes held by the tracker.
    pub live_passes: usize,
    /// Stage attempts launched and not yet applied.
    pub in_flight: usize,
    pub max_concurrent_stages: usize,
    /// Working directories waiting for their retention to expire.
    pub pending_cleanups: usize,
    /// Reports sent since start.
    pub reports_sent: u64,
}
