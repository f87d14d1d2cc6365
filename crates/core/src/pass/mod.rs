//! Pass correlation.
//!
//! A pass is one overpass of an EOS platform observed by the ground
//! station. Raw segment files announced over the bus are correlated into
//! passes by platform and a start-time tolerance window; the tracker owns the
//! live passes and hands out [`PassHandle`]s for the orchestrator to mutate.
//!
//! # Flow
//!
//! 1. The listener normalizes a bus message into a [`PassEvent`]
//! 2. [`PassTracker::ingest`] merges it into a live pass or creates one
//! 3. Once every raw role has a file the pass is ready for its first stage
//! 4. Finished passes are evicted; their window stays blocked for a short
//!    while so late duplicates do not re-trigger processing

mod config;
mod tracker;
mod types;

pub use config::TrackerConfig;
pub use tracker::{IgnoreReason, Ingest, PassHandle, PassTracker};
pub use types::{
    Pass, PassEvent, PassId, PassStatus, PassWindow, Platform, StageRecord, StageState,
    UnknownPlatform,
};
