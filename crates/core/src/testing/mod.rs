//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the stage runner and
//! publisher traits plus fixtures for passes and pipelines, so the tracker
//! and orchestrator can be exercised without external processing tools.
//!
//! # Example
//!
//! ```rust,ignore
//! use modis_runner_core::testing::{fixtures, MockPublisher, MockStageRunner};
//!
//! let runner = MockStageRunner::new();
//! let publisher = MockPublisher::new();
//!
//! runner.script("decode", vec![StageOutcome::TimedOut]).await;
//! tracker.ingest(fixtures::terra_event(start)).await;
//! ```

mod mock_publisher;
mod mock_stage_runner;

pub use mock_publisher::MockPublisher;
pub use mock_stage_runner::MockStageRunner;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    use crate::pass::{
        Pass, PassEvent, PassId, PassStatus, PassWindow, Platform, StageRecord,
    };
    use crate::pipeline::{PipelineSpec, PipelinesConfig, RawInput, StageSpec};
    use crate::publisher::ProductNotification;

    /// Directory fixture events point into.
    pub const DATA_DIR: &str = "/data";

    /// A Terra MODIS packet file name matching the Terra pipeline.
    pub const TERRA_FILE: &str = "P0420064AAAAAAAAAAAAAA24356010100001.PDS";

    pub const TERRA_PATTERN: &str = "P0420064AAAAAAAAAAAAAA*001.PDS";
    pub const AQUA_MODIS_PATTERN: &str = "P1540064AAAAAAAAAAAAAA*001.PDS";
    pub const AQUA_GBAD_PATTERN: &str = "P154095715409581540959*001.PDS";

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn decode_stage() -> StageSpec {
        StageSpec::new(
            "decode",
            "1A",
            args(&[
                "modis_L1A",
                "--verbose",
                "--mission={mission}",
                "--startnudge={start_nudge}",
                "--stopnudge={end_nudge}",
                "-o",
                "{output:0}",
                "{inputs}",
            ]),
        )
        .with_inputs(args(&["{raw:modis}"]))
        .with_outputs(args(&["{mission}{start_time:%Y%j%H%M%S}.L1A_LAC"]))
    }

    fn geolocate_stage(extra_inputs: &[&str]) -> StageSpec {
        let mut inputs = args(&["{artifact:decode}"]);
        inputs.extend(args(extra_inputs));
        StageSpec::new(
            "geolocate",
            "1A",
            args(&["geolocate_l1a", "--verbose", "{inputs}", "{output:0}"]),
        )
        .with_inputs(inputs)
        .with_outputs(args(&["{mission}{start_time:%Y%j%H%M%S}.GEO"]))
    }

    fn calibrate_stage() -> StageSpec {
        StageSpec::new(
            "calibrate",
            "1B",
            args(&["modis_L1B", "--verbose", "{input:0}", "{input:1}"]),
        )
        .with_inputs(args(&["{artifact:decode}", "{artifact:geolocate}"]))
        .with_outputs(args(&["{mission}{start_time:%Y%j%H%M%S}.L1B_*"]))
    }

    /// Terra: decode, geolocate, calibrate.
    pub fn terra_pipeline() -> PipelineSpec {
        PipelineSpec {
            raw_inputs: vec![RawInput::new("modis", TERRA_PATTERN)],
            stages: vec![decode_stage(), geolocate_stage(&[]), calibrate_stage()],
        }
    }

    /// Aqua: gbad, decode, geolocate, calibrate. Needs both packet files.
    pub fn aqua_pipeline() -> PipelineSpec {
        let mut gbad = StageSpec::new(
            "gbad",
            "att_eph",
            args(&["gbad_run", "{input:0}", "{pass_dir}/gbad"]),
        )
        .with_inputs(args(&["{raw:gbad}"]))
        .with_outputs(args(&["{pass_dir}/gbad/*.att"]));
        gbad.publish = false;

        PipelineSpec {
            raw_inputs: vec![
                RawInput::new("modis", AQUA_MODIS_PATTERN),
                RawInput::new("gbad", AQUA_GBAD_PATTERN),
            ],
            stages: vec![
                gbad,
                decode_stage(),
                geolocate_stage(&["{artifact:gbad}"]),
                calibrate_stage(),
            ],
        }
    }

    pub fn pipelines() -> PipelinesConfig {
        PipelinesConfig {
            aqua: Some(aqua_pipeline()),
            terra: Some(terra_pipeline()),
        }
    }

    /// Terra event for [`TERRA_FILE`] under [`DATA_DIR`].
    pub fn terra_event(start: DateTime<Utc>) -> PassEvent {
        terra_event_named(start, TERRA_FILE)
    }

    pub fn terra_event_named(start: DateTime<Utc>, name: &str) -> PassEvent {
        PassEvent::new(Platform::Terra, start, Path::new(DATA_DIR).join(name))
            .with_topic("/XLBANDANTENNA/TERRA/ISP")
    }

    /// Terra event for a file that lives in `dir`.
    pub fn terra_event_in(dir: &Path, start: DateTime<Utc>, name: &str) -> PassEvent {
        PassEvent::new(Platform::Terra, start, dir.join(name))
            .with_topic("/XLBANDANTENNA/TERRA/ISP")
    }

    pub fn aqua_modis_event(start: DateTime<Utc>) -> PassEvent {
        let name = format!("P1540064AAAAAAAAAAAAAA{}001.PDS", start.format("%y%j%H%M%S"));
        PassEvent::new(Platform::Aqua, start, Path::new(DATA_DIR).join(name))
            .with_topic("/XLBANDANTENNA/AQUA/ISP")
    }

    pub fn aqua_gbad_event(start: DateTime<Utc>) -> PassEvent {
        let name = format!("P154095715409581540959{}001.PDS", start.format("%y%j%H%M%S"));
        PassEvent::new(Platform::Aqua, start, Path::new(DATA_DIR).join(name))
            .with_topic("/XLBANDANTENNA/AQUA/ISP")
    }

    /// A ready Terra pass holding [`TERRA_FILE`], nothing run yet.
    pub fn terra_pass(start: DateTime<Utc>) -> Pass {
        let pipeline = terra_pipeline();
        let mut raw_files = BTreeMap::new();
        raw_files.insert("modis".to_string(), Path::new(DATA_DIR).join(TERRA_FILE));

        Pass {
            id: PassId::derive(Platform::Terra, start),
            platform: Platform::Terra,
            window: PassWindow::around(start, Duration::minutes(5), Duration::minutes(5)),
            start_time: start,
            orbit_number: None,
            raw_files,
            required_roles: pipeline.required_roles(),
            stages: pipeline
                .stages
                .iter()
                .map(|s| StageRecord::new(&s.name, s.enabled))
                .collect(),
            status: PassStatus::Active,
            events_merged: 1,
            created_at: start,
            last_updated_at: start,
            waiting_for_slot: None,
        }
    }

    /// A notification for an artifact of a Terra pass.
    pub fn notification(stage: &str, path: &str) -> ProductNotification {
        let start = Utc::now();
        let uid = PathBuf::from(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        ProductNotification {
            id: Uuid::new_v4(),
            topic: "/EOS/1A/unknown/polar/direct_readout".to_string(),
            pass_id: PassId::derive(Platform::Terra, start),
            platform: Platform::Terra,
            platform_name: Platform::Terra.platform_name().to_string(),
            start_time: start,
            orbit_number: None,
            product: "1A".to_string(),
            uri: format!("file://{}", path),
            uid,
            stage: stage.to_string(),
            station: "unknown".to_string(),
            sensor: "modis".to_string(),
            format: "EOS".to_string(),
            data_type: "HDF4".to_string(),
            published_at: start,
        }
    }
}
