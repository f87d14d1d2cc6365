use std::sync::Arc;

use tokio::sync::mpsc;

use modis_runner_core::{AuditStore, Config, PassOrchestrator, PassTracker, RawMessage};

use crate::api::WsBroadcaster;

/// Shared application state
pub struct AppState {
    config: Config,
    audit_store: Arc<dyn AuditStore>,
    tracker: Arc<PassTracker>,
    orchestrator: PassOrchestrator,
    triggers: mpsc::Sender<RawMessage>,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        audit_store: Arc<dyn AuditStore>,
        tracker: Arc<PassTracker>,
        orchestrator: PassOrchestrator,
        triggers: mpsc::Sender<RawMessage>,
        ws_broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            config,
            audit_store,
            tracker,
            orchestrator,
            triggers,
            ws_broadcaster,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn tracker(&self) -> &PassTracker {
        self.tracker.as_ref()
    }

    pub fn orchestrator(&self) -> &PassOrchestrator {
        &self.orchestrator
    }

    /// Intake channel of the trigger listener.
    pub fn triggers(&self) -> &mpsc::Sender<RawMessage> {
        &self.triggers
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }
}
