use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Largest page a single query returns.
pub const MAX_PAGE: i64 = 1000;

/// Result ordering by timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Filter for querying audit events.
///
/// Several event types match any of them; every other criterion narrows.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub pass_id: Option<String>,
    pub event_types: Vec<String>,
    pub stage: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order: Order,
    pub limit: i64,
    pub offset: i64,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    /// Every event of one pass, oldest first.
    pub fn history(pass_id: impl Into<String>) -> Self {
        Self::new()
            .with_pass_id(pass_id)
            .with_order(Order::OldestFirst)
            .with_limit(MAX_PAGE)
    }

    pub fn with_pass_id(mut self, pass_id: impl Into<String>) -> Self {
        self.pass_id = Some(pass_id.into());
        self
    }

    /// Adds an accepted event type.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether `record` passes every criterion (pagination aside).
    pub fn matches(&self, record: &AuditRecord) -> bool {
        let eq = |want: &Option<String>, have: &Option<String>| {
            want.as_ref().map_or(true, |w| have.as_deref() == Some(w.as_str()))
        };
        eq(&self.pass_id, &record.pass_id)
            && eq(&self.stage, &record.stage)
            && (self.event_types.is_empty() || self.event_types.contains(&record.event_type))
            && self.from.map_or(true, |from| record.timestamp >= from)
            && self.to.map_or(true, |to| record.timestamp <= to)
    }
}

/// Trait for audit event storage
pub trait AuditStore: Send + Sync {
    /// Insert an audit record, returns the assigned ID
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Query audit records, ordered and paginated as the filter says
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Count matching audit records, ignoring pagination
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;

    /// Lifecycle of one pass in the order it happened.
    fn pass_history(&self, pass_id: &str) -> Result<Vec<AuditRecord>, AuditError> {
        self.query(&AuditFilter::history(pass_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEvent;
    use chrono::TimeZone;

    fn record(event: AuditEvent, minute: u32) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp: Utc.with_ymd_and_hms(2024, 12, 21, 1, minute, 0).unwrap(),
            event_type: event.event_type().to_string(),
            pass_id: event.pass_id().map(String::from),
            stage: event.stage().map(String::from),
            data: event,
        }
    }

    fn stage_failed() -> AuditRecord {
        record(
            AuditEvent::StageFailed {
                pass_id: "terra_202412210101".to_string(),
                stage: "decode".to_string(),
                attempt: 1,
                reason: "timed out".to_string(),
                will_retry: true,
            },
            5,
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(AuditFilter::new().matches(&stage_failed()));
    }

    #[test]
    fn test_event_types_are_alternatives() {
        let filter = AuditFilter::new()
            .with_event_type("stage_succeeded")
            .with_event_type("stage_failed");
        assert!(filter.matches(&stage_failed()));

        let filter = AuditFilter::new().with_event_type("stage_succeeded");
        assert!(!filter.matches(&stage_failed()));
    }

    #[test]
    fn test_pass_and_stage_narrow() {
        let rec = stage_failed();
        assert!(AuditFilter::history("terra_202412210101").matches(&rec));
        assert!(!AuditFilter::history("aqua_202412210101").matches(&rec));
        assert!(!AuditFilter::new().with_stage("calibrate").matches(&rec));
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let rec = stage_failed();
        let at = rec.timestamp;
        assert!(AuditFilter::new()
            .with_time_range(Some(at), Some(at))
            .matches(&rec));
        assert!(!AuditFilter::new()
            .with_time_range(Some(at + chrono::Duration::seconds(1)), None)
            .matches(&rec));
    }

    #[test]
    fn test_history_is_chronological() {
        let filter = AuditFilter::history("terra_202412210101");
        assert_eq!(filter.order, Order::OldestFirst);
        assert_eq!(filter.limit, MAX_PAGE);
    }
}
