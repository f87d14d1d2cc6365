pub mod audit;
pub mod config;
pub mod listener;
pub mod locator;
pub mod metrics;
pub mod orchestrator;
pub mod pass;
pub mod pipeline;
pub mod publisher;
pub mod stage;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditEventEnvelope, AuditFilter, AuditHandle,
    AuditRecord, AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    ServerConfig,
};
pub use listener::{ListenerConfig, RawMessage, TriggerError, TriggerListener};
pub use locator::{FileLocator, LocatorConfig, LocatorError, Template};
pub use orchestrator::{
    FailureKind, OrchestratorConfig, OrchestratorError, OrchestratorStatus, PassOrchestrator,
    PassReport, RetryConfig,
};
pub use pass::{Pass, PassEvent, PassId, PassStatus, PassTracker, Platform, TrackerConfig};
pub use pipeline::{PipelineSpec, PipelinesConfig, StageSpec};
pub use publisher::{
    BroadcastPublisher, ProductNotification, PublishError, Publisher, PublisherConfig,
    ResultPublisher,
};
pub use stage::{ProcessStageRunner, StageOutcome, StageRequest, StageRunner, StageRunnerConfig};
