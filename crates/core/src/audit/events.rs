use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Trigger intake
    PassCreated {
        pass_id: String,
        platform: String,
        start_time: DateTime<Utc>,
        raw_file: String,
    },
    PassMerged {
        pass_id: String,
        raw_file: String,
        /// False when the same file was announced again.
        new_file: bool,
    },
    EventIgnored {
        platform: String,
        raw_file: String,
        reason: String,
    },

    // Stage lifecycle
    StageStarted {
        pass_id: String,
        stage: String,
        attempt: u32,
        command: Vec<String>,
    },
    StageSucceeded {
        pass_id: String,
        stage: String,
        attempt: u32,
        artifacts: Vec<String>,
        duration_ms: u64,
    },
    StageFailed {
        pass_id: String,
        stage: String,
        attempt: u32,
        reason: String,
        /// Whether another attempt is scheduled.
        will_retry: bool,
    },

    // Pass outcomes (exactly one per pass)
    PassCompleted {
        pass_id: String,
        stages_run: u32,
        duration_ms: u64,
    },
    PassFailed {
        pass_id: String,
        stage: String,
        reason: String,
    },
    PassAborted {
        pass_id: String,
        reason: String,
    },
    PassAbandoned {
        pass_id: String,
        idle_secs: i64,
    },

    // Downstream
    ProductPublished {
        pass_id: String,
        stage: String,
        product: String,
        uri: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::PassCreated { .. } => "pass_created",
            Self::PassMerged { .. } => "pass_merged",
            Self::EventIgnored { .. } => "event_ignored",
            Self::StageStarted { .. } => "stage_started",
            Self::StageSucceeded { .. } => "stage_succeeded",
            Self::StageFailed { .. } => "stage_failed",
            Self::PassCompleted { .. } => "pass_completed",
            Self::PassFailed { .. } => "pass_failed",
            Self::PassAborted { .. } => "pass_aborted",
            Self::PassAbandoned { .. } => "pass_abandoned",
            Self::ProductPublished { .. } => "product_published",
        }
    }

    pub fn pass_id(&self) -> Option<&str> {
        match self {
            Self::PassCreated { pass_id, .. }
            | Self::PassMerged { pass_id, .. }
            | Self::StageStarted { pass_id, .. }
            | Self::StageSucceeded { pass_id, .. }
            | Self::StageFailed { pass_id, .. }
            | Self::PassCompleted { pass_id, .. }
            | Self::PassFailed { pass_id, .. }
            | Self::PassAborted { pass_id, .. }
            | Self::PassAbandoned { pass_id, .. }
            | Self::ProductPublished { pass_id, .. } => Some(pass_id),
            Self::ServiceStarted { .. } | Self::ServiceStopped { .. } | Self::EventIgnored { .. } => {
                None
            }
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageStarted { stage, .. }
            | Self::StageSucceeded { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::PassFailed { stage, .. }
            | Self::ProductPublished { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Whether this event closes a pass.
    pub fn is_pass_terminal(&self) -> bool {
        matches!(
            self,
            Self::PassCompleted { .. }
                | Self::PassFailed { .. }
                | Self::PassAborted { .. }
                | Self::PassAbandoned { .. }
        )
    }
}

/// Stored audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub pass_id: Option<String>,
    pub stage: Option<String>,
    pub data: AuditEvent,
}
