use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::AuditEvent;

/// Envelope wrapping an audit event with metadata
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Handle for emitting audit events
///
/// Cheaply cloneable; the tracker intake, orchestrator and publisher each hold one.
/// Events are sent through a bounded channel and written by the [`AuditWriter`](super::AuditWriter).
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an audit event, waiting for channel capacity.
    ///
    /// A closed channel is logged, never returned to the caller.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.send(AuditEventEnvelope::now(event)).await {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abandoned(pass_id: &str) -> AuditEvent {
        AuditEvent::PassAbandoned {
            pass_id: pass_id.to_string(),
            idle_secs: 3700,
        }
    }

    #[tokio::test]
    async fn test_emit_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        handle.emit(abandoned("terra_202405011000")).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert_eq!(envelope.event.pass_id(), Some("terra_202405011000"));
    }

    #[tokio::test]
    async fn test_cloned_handles_share_channel() {
        let (tx, mut rx) = mpsc::channel(10);
        let first = AuditHandle::new(tx);
        let second = first.clone();

        first.emit(abandoned("a")).await;
        second
            .emit(AuditEvent::ServiceStopped {
                reason: "test".to_string(),
            })
            .await;

        assert!(matches!(
            rx.recv().await.unwrap().event,
            AuditEvent::PassAbandoned { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap().event,
            AuditEvent::ServiceStopped { .. }
        ));
    }

    #[tokio::test]
    async fn test_emit_closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::channel::<AuditEventEnvelope>(10);
        let handle = AuditHandle::new(tx);
        drop(rx);

        handle.emit(abandoned("a")).await;
    }

    #[tokio::test]
    async fn test_envelope_has_timestamp() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        let before = Utc::now();
        handle.emit(abandoned("a")).await;
        let after = Utc::now();

        let envelope = rx.try_recv().expect("Should receive event");
        assert!(envelope.timestamp >= before && envelope.timestamp <= after);
    }
}
