//! Core pass data types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Platform
// ============================================================================

/// EOS platform carrying the MODIS instrument.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Aqua,
    Terra,
}

impl Platform {
    /// Lowercase slug used in pass ids and templates.
    pub fn slug(&self) -> &'static str {
        match self {
            Platform::Aqua => "aqua",
            Platform::Terra => "terra",
        }
    }

    /// Full platform name as announced on the bus.
    pub fn platform_name(&self) -> &'static str {
        match self {
            Platform::Aqua => "EOS-Aqua",
            Platform::Terra => "EOS-Terra",
        }
    }

    /// Single-letter mission code expected by the level-1 scripts.
    pub fn mission(&self) -> &'static str {
        match self {
            Platform::Aqua => "A",
            Platform::Terra => "T",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Error returned when a platform name is not an EOS MODIS platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let name = normalized.strip_prefix("eos-").unwrap_or(&normalized);
        match name {
            "aqua" => Ok(Platform::Aqua),
            "terra" => Ok(Platform::Terra),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// A validated trigger: one raw segment file has arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassEvent {
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    /// Local path of the raw packet file.
    pub uri: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_hint: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Topic the trigger arrived on.
    #[serde(default)]
    pub topic: String,
    pub received_at: DateTime<Utc>,
}

impl PassEvent {
    /// Creates an event received now with no optional fields.
    pub fn new(platform: Platform, start_time: DateTime<Utc>, uri: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            start_time,
            uri: uri.into(),
            sequence_hint: None,
            orbit_number: None,
            end_time: None,
            topic: String::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// File name component of the raw file path.
    pub fn file_name(&self) -> Option<&str> {
        self.uri.file_name().and_then(|n| n.to_str())
    }
}

// ============================================================================
// Identity and window
// ============================================================================

/// Stable identifier of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassId(pub String);

impl PassId {
    /// Derives the id from the platform and the window anchor, bucketed to the minute.
    pub fn derive(platform: Platform, anchor: DateTime<Utc>) -> Self {
        Self(format!("{}_{}", platform.slug(), anchor.format("%Y%m%d%H%M")))
    }

    /// Variant used when the plain id is already taken by another live pass.
    pub fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}-{}", self.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PassId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Merge tolerance interval around the first announced start time.
///
/// The window is closed on both ends and never moves after the pass is
/// created, so a chain of events each a few minutes apart cannot stretch one
/// pass indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassWindow {
    pub anchor: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PassWindow {
    pub fn around(anchor: DateTime<Utc>, start_nudge: Duration, end_nudge: Duration) -> Self {
        Self {
            anchor,
            start: anchor - start_nudge,
            end: anchor + end_nudge,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

// ============================================================================
// Stage state
// ============================================================================

/// State of one stage of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running {
        attempt: u32,
        started_at: DateTime<Utc>,
    },
    Succeeded {
        artifacts: Vec<PathBuf>,
    },
    Failed {
        reason: String,
        attempt_count: u32,
        /// When the next attempt may start; `None` once the failure is terminal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_at: Option<DateTime<Utc>>,
    },
    Skipped,
}

impl StageState {
    /// Succeeded or skipped: later stages may proceed.
    pub fn is_done(&self) -> bool {
        matches!(self, StageState::Succeeded { .. } | StageState::Skipped)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, StageState::Failed { retry_at: None, .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, StageState::Running { .. })
    }
}

/// A stage slot inside a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub state: StageState,
    /// Attempts started so far.
    pub attempts: u32,
    /// When the stage first became eligible to run (inputs grace period starts here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_since: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            state: if enabled {
                StageState::Pending
            } else {
                StageState::Skipped
            },
            attempts: 0,
            eligible_since: None,
        }
    }
}

/// Lifecycle of the pass as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassStatus {
    Active,
    Succeeded,
    Failed { stage: String, reason: String },
    Aborted { reason: String },
    Abandoned,
}

impl PassStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PassStatus::Active)
    }

    pub fn status_type(&self) -> &'static str {
        match self {
            PassStatus::Active => "active",
            PassStatus::Succeeded => "succeeded",
            PassStatus::Failed { .. } => "failed",
            PassStatus::Aborted { .. } => "aborted",
            PassStatus::Abandoned => "abandoned",
        }
    }
}

// ============================================================================
// Pass
// ============================================================================

/// One satellite overpass segment being processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pass {
    pub id: PassId,
    pub platform: Platform,
    pub window: PassWindow,
    /// Earliest announced start time; frozen once the first stage has started.
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit_number: Option<u32>,
    /// Arrived raw files keyed by role.
    pub raw_files: BTreeMap<String, PathBuf>,
    /// Raw roles that must all hold a file before processing starts.
    pub required_roles: Vec<String>,
    pub stages: Vec<StageRecord>,
    pub status: PassStatus,
    pub events_merged: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Set while the current stage is ready but every stage slot is taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for_slot: Option<DateTime<Utc>>,
}

impl Pass {
    /// Index of the first stage that is neither succeeded nor skipped.
    pub fn current_stage_index(&self) -> Option<usize> {
        self.stages.iter().position(|s| !s.state.is_done())
    }

    pub fn current_stage(&self) -> Option<&StageRecord> {
        self.current_stage_index().map(|i| &self.stages[i])
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_state(&self, name: &str) -> Option<&StageState> {
        self.stage(name).map(|s| &s.state)
    }

    /// Whether stage `index` may enter `Running` under the ordering rule.
    pub fn can_start(&self, index: usize) -> bool {
        index < self.stages.len() && self.stages[..index].iter().all(|s| s.state.is_done())
    }

    /// All raw roles have a file.
    pub fn is_ready(&self) -> bool {
        self.required_roles
            .iter()
            .all(|role| self.raw_files.contains_key(role))
    }

    /// Whether any stage has ever been started.
    pub fn has_started(&self) -> bool {
        self.stages.iter().any(|s| s.attempts > 0)
    }

    /// Every stage is succeeded or skipped.
    pub fn all_stages_done(&self) -> bool {
        self.stages.iter().all(|s| s.state.is_done())
    }

    pub fn running_count(&self) -> usize {
        self.stages.iter().filter(|s| s.state.is_running()).count()
    }

    /// Artifacts of a succeeded stage.
    pub fn artifacts(&self, stage: &str) -> Option<&[PathBuf]> {
        match self.stage_state(stage)? {
            StageState::Succeeded { artifacts } => Some(artifacts),
            _ => None,
        }
    }

    /// Marks every non-terminal stage skipped (used by abort).
    pub fn skip_remaining(&mut self) {
        for stage in &mut self.stages {
            if !stage.state.is_done() && !stage.state.is_terminal_failure() {
                stage.state = StageState::Skipped;
            }
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated_at = now;
    }
}
