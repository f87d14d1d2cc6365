//! Per-platform processing pipelines.
//!
//! A pipeline is the ordered list of external stages a pass goes through,
//! together with the raw-file roles that must arrive before the first stage
//! may start. Pipelines are pure configuration; the orchestrator consumes them.

mod spec;

pub use spec::{PipelineSpec, PipelinesConfig, RawInput, StageSpec};
