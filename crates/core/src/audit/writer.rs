use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Events taken off the channel per wake-up.
const BATCH: usize = 64;

/// Background task that receives audit events and writes them to storage
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer until every [`AuditHandle`] has been dropped.
    ///
    /// Events are drained in batches; a failed insert is logged and the
    /// rest of the batch still goes through. Spawn this as a background task.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        let mut batch = Vec::with_capacity(BATCH);
        let (mut written, mut failed) = (0u64, 0u64);
        while self.rx.recv_many(&mut batch, BATCH).await > 0 {
            for envelope in batch.drain(..) {
                match self.store.insert(&AuditRecord::from(envelope)) {
                    Ok(_) => written += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::error!("Failed to write audit event: {}", e);
                    }
                }
            }
        }

        tracing::info!(written, failed, "Audit writer shutting down");
    }
}

impl From<AuditEventEnvelope> for AuditRecord {
    fn from(envelope: AuditEventEnvelope) -> Self {
        AuditRecord {
            id: 0,
            timestamp: envelope.timestamp,
            event_type: envelope.event.event_type().to_string(),
            pass_id: envelope.event.pass_id().map(String::from),
            stage: envelope.event.stage().map(String::from),
            data: envelope.event,
        }
    }
}

/// Create a complete audit system
///
/// Returns the [`AuditHandle`] to clone into components and the
/// [`AuditWriter`] to spawn with `tokio::spawn(writer.run())`.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = AuditHandle::new(tx);
    let writer = AuditWriter::new(rx, store);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter, Order};

    /// Store that keeps records in memory, optionally failing every insert
    struct MemoryStore {
        records: Mutex<Vec<AuditRecord>>,
        should_fail: bool,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                should_fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                should_fail: true,
            }
        }

        fn records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditStore for MemoryStore {
        fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
            if self.should_fail {
                return Err(AuditError::Database("Mock failure".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let id = records.len() as i64 + 1;
            let mut stored = record.clone();
            stored.id = id;
            records.push(stored);
            Ok(id)
        }

        fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            let mut matching: Vec<AuditRecord> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect();
            if filter.order == Order::NewestFirst {
                matching.reverse();
            }
            Ok(matching
                .into_iter()
                .skip(filter.offset as usize)
                .take(filter.limit as usize)
                .collect())
        }

        fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| filter.matches(r))
                .count() as i64)
        }
    }

    fn system(store: &Arc<MemoryStore>) -> (AuditHandle, AuditWriter) {
        let store_dyn: Arc<dyn AuditStore> = Arc::clone(store) as Arc<dyn AuditStore>;
        create_audit_system(store_dyn, 100)
    }

    #[tokio::test]
    async fn test_writer_extracts_pass_and_stage() {
        let store = Arc::new(MemoryStore::new());
        let (handle, writer) = system(&store);
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::StageStarted {
                pass_id: "aqua_202405011000".to_string(),
                stage: "gbad".to_string(),
                attempt: 1,
                command: vec!["gbad".to_string()],
            })
            .await;
        drop(handle);
        writer_handle.await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "stage_started");
        assert_eq!(records[0].pass_id.as_deref(), Some("aqua_202405011000"));
        assert_eq!(records[0].stage.as_deref(), Some("gbad"));
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let store = Arc::new(MemoryStore::failing());
        let (handle, writer) = system(&store);
        let writer_handle = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            })
            .await;
        drop(handle);

        writer_handle.await.unwrap();
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let store = Arc::new(MemoryStore::new());
        let (main_handle, writer) = system(&store);
        let orchestrator_handle = main_handle.clone();
        let writer_handle = tokio::spawn(writer.run());

        orchestrator_handle
            .emit(AuditEvent::PassCompleted {
                pass_id: "terra_202405011000".to_string(),
                stages_run: 3,
                duration_ms: 1200,
            })
            .await;
        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;

        drop(main_handle);
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(
            !writer_handle.is_finished(),
            "Writer should still be running with handles alive"
        );

        drop(orchestrator_handle);
        let result = tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_handle).await;
        assert!(result.is_ok(), "Writer should exit after all handles dropped");

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, "pass_completed");
        assert_eq!(records[1].event_type, "service_stopped");
    }

    #[tokio::test]
    async fn test_burst_is_written_in_order() {
        let store = Arc::new(MemoryStore::new());
        let (handle, writer) = system(&store);

        // Queue more than one batch before the writer starts
        for attempt in 1..=(BATCH as u32 + 6) {
            handle
                .emit(AuditEvent::StageFailed {
                    pass_id: "terra_202405011000".to_string(),
                    stage: "decode".to_string(),
                    attempt,
                    reason: "timed out".to_string(),
                    will_retry: true,
                })
                .await;
        }
        drop(handle);
        tokio::spawn(writer.run()).await.unwrap();

        let history = store.pass_history("terra_202405011000").unwrap();
        assert_eq!(history.len(), BATCH + 6);
        let attempts: Vec<u32> = history
            .iter()
            .map(|r| match r.data {
                AuditEvent::StageFailed { attempt, .. } => attempt,
                _ => 0,
            })
            .collect();
        assert!(attempts.windows(2).all(|w| w[0] < w[1]));
    }
}
