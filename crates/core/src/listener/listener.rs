//! Feeds validated trigger messages into the pass tracker.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;
use crate::orchestrator::FailureKind;
use crate::pass::{Ingest, PassTracker};

use super::config::ListenerConfig;
use super::normalize::normalize;
use super::types::{RawMessage, TriggerError};

/// Validates messages and hands the resulting events to the tracker.
///
/// Anything that does not validate is rejected here with a logged reason;
/// the tracker only ever sees typed [`PassEvent`](crate::pass::PassEvent)s.
pub struct TriggerListener {
    config: ListenerConfig,
    tracker: Arc<PassTracker>,
    audit: Option<AuditHandle>,
    wake: Option<Arc<Notify>>,
}

impl TriggerListener {
    pub fn new(config: ListenerConfig, tracker: Arc<PassTracker>) -> Self {
        Self {
            config,
            tracker,
            audit: None,
            wake: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Notified after any message that created or extended a pass.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Handles one message. Returns the tracker's answer per announced file.
    pub async fn handle(&self, msg: RawMessage) -> Result<Vec<Ingest>, TriggerError> {
        let now = Utc::now();
        let events = match normalize(&msg, &self.config, now) {
            Ok(events) => events,
            Err(e) => {
                metrics::TRIGGERS_REJECTED
                    .with_label_values(&[e.kind()])
                    .inc();
                warn!(topic = %msg.topic, "Rejected trigger message: {}", e);
                return Err(e);
            }
        };

        let mut results = Vec::with_capacity(events.len());
        let mut progressed = false;
        for event in events {
            let raw_file = event.uri.display().to_string();
            let platform = event.platform;
            let result = self.tracker.ingest_at(event, now).await;

            match &result {
                Ingest::Created(handle) => {
                    progressed = true;
                    if let Some(ref audit) = self.audit {
                        let pass = handle.snapshot().await;
                        audit
                            .emit(AuditEvent::PassCreated {
                                pass_id: pass.id.to_string(),
                                platform: platform.slug().to_string(),
                                start_time: pass.start_time,
                                raw_file,
                            })
                            .await;
                    }
                }
                Ingest::Merged { handle, new_file } => {
                    progressed |= *new_file;
                    if let Some(kind) = FailureKind::of_ingest(&result) {
                        debug!(pass_id = %handle.id(), ?kind, "Duplicate trigger for {}", raw_file);
                    }
                    if let Some(ref audit) = self.audit {
                        audit
                            .emit(AuditEvent::PassMerged {
                                pass_id: handle.id().to_string(),
                                raw_file,
                                new_file: *new_file,
                            })
                            .await;
                    }
                }
                Ingest::Ignored(reason) => {
                    debug!("Ignored {}: {}", raw_file, reason);
                    if let Some(ref audit) = self.audit {
                        audit
                            .emit(AuditEvent::EventIgnored {
                                platform: platform.slug().to_string(),
                                raw_file,
                                reason: reason.to_string(),
                            })
                            .await;
                    }
                }
            }
            results.push(result);
        }

        if progressed {
            if let Some(ref wake) = self.wake {
                wake.notify_one();
            }
        }
        Ok(results)
    }

    /// Consumes messages until the channel closes or shutdown is signalled.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<RawMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("Trigger listener started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Trigger listener received shutdown signal");
                    break;
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        info!("Trigger channel closed");
                        break;
                    };
                    // Rejections are already logged and counted.
                    let _ = self.handle(msg).await;
                }
            }
        }
        info!("Trigger listener stopped");
    }
}
