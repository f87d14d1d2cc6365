//! Pass orchestration.
//!
//! The orchestrator drives every live pass through its stage pipeline:
//!
//! ```text
//! Pending -> Running -> Succeeded -> (next stage) ... -> pass Succeeded
//!               |
//!               +-> Failed { retry_at } -> Running (after backoff)
//!               +-> Failed (terminal)   -> pass Failed
//! ```
//!
//! Advancement happens only in [`PassOrchestrator::tick`]. Stage attempts run
//! on spawned tasks and hand their outcome back through a channel, together
//! with the admission permit, so the number of running stages never exceeds
//! `max_concurrent_stages`. Every pass that reaches a terminal status produces
//! exactly one [`PassReport`].

mod config;
mod runner;
mod types;

pub use config::{OrchestratorConfig, RetryConfig};
pub use runner::PassOrchestrator;
pub use types::{FailureKind, OrchestratorError, OrchestratorStatus, PassReport, TickSummary};
