//! Property-based tests for pass merging and stage ordering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tempfile::TempDir;
use tokio_test::block_on;

use modis_runner_core::{
    orchestrator::TickSummary,
    pass::{Ingest, StageState},
    testing::{fixtures, MockStageRunner},
    LocatorConfig, OrchestratorConfig, PassOrchestrator, PassReport, PassStatus, PassTracker,
    RetryConfig, StageOutcome, TrackerConfig,
};

const STAGES: [&str; 3] = ["decode", "geolocate", "calibrate"];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, 21, 1, 1, 0).unwrap()
}

fn terra_name(start: DateTime<Utc>, seq: usize) -> String {
    format!(
        "P0420064AAAAAAAAAAAAAA{:06}{}001.PDS",
        seq,
        start.format("%y%j%H%M%S")
    )
}

fn tracker() -> PassTracker {
    PassTracker::new(TrackerConfig::default(), Arc::new(fixtures::pipelines()))
}

/// Generates a transient failure or a success.
fn arb_outcome() -> impl Strategy<Value = StageOutcome> {
    prop_oneof![
        3 => Just(StageOutcome::completed(Vec::new())),
        1 => Just(StageOutcome::TimedOut),
        1 => Just(StageOutcome::ArtifactMissing),
        1 => (1i32..4).prop_map(|code| StageOutcome::NonZeroExit { code }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Events within the nudge window of the first one always land in one pass.
    #[test]
    fn prop_events_within_window_merge(offsets in prop::collection::vec(-300i64..=300, 1..12)) {
        let tracker = tracker();
        block_on(async {
            tracker
                .ingest_at(fixtures::terra_event_named(t0(), &terra_name(t0(), 0)), t0())
                .await;
            for (i, offset) in offsets.iter().enumerate() {
                let start = t0() + chrono::Duration::seconds(*offset);
                let event = fixtures::terra_event_named(start, &terra_name(start, i + 1));
                let ingest = tracker.ingest_at(event, t0()).await;
                assert!(matches!(ingest, Ingest::Merged { .. }));
            }
        });
        prop_assert_eq!(block_on(tracker.len()), 1);
        let passes = block_on(tracker.list());
        prop_assert_eq!(passes[0].events_merged as usize, offsets.len() + 1);
    }

    /// Events further apart than both nudges never share a pass, whatever their order.
    #[test]
    fn prop_events_outside_window_stay_apart(
        gap in 601i64..7200,
        order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let tracker = tracker();
        block_on(async {
            for i in &order {
                let start = t0() + chrono::Duration::seconds(gap * *i as i64);
                let event = fixtures::terra_event_named(start, &terra_name(start, *i));
                assert!(matches!(tracker.ingest_at(event, t0()).await, Ingest::Created(_)));
            }
        });
        prop_assert_eq!(block_on(tracker.len()), order.len());
    }

    /// Stage k+1 only ever runs after stage k succeeded, and the running cap holds.
    #[test]
    fn prop_stage_order_and_cap_hold(
        passes in 1usize..5,
        cap in 1usize..4,
        scripts in prop::collection::vec(prop::collection::vec(arb_outcome(), 0..5), 3),
    ) {
        let (reports, requests, peak) = block_on(run_passes(passes, cap, scripts));

        prop_assert!(peak <= cap);
        prop_assert_eq!(reports.len(), passes);

        for report in &reports {
            let stages: Vec<usize> = requests
                .get(report.pass_id.as_str())
                .cloned()
                .unwrap_or_default();
            prop_assert!(stages.windows(2).all(|w| w[0] <= w[1]), "out of order: {:?}", stages);

            for (index, record) in report.stages.iter().enumerate() {
                let runs = stages.iter().filter(|s| **s == index).count() as u32;
                prop_assert_eq!(record.attempts, runs);
                if runs > 0 && index > 0 {
                    let previous_succeeded = matches!(
                        report.stages[index - 1].state,
                        StageState::Succeeded { .. }
                    );
                    prop_assert!(previous_succeeded);
                }
            }

            match &report.status {
                PassStatus::Succeeded => prop_assert_eq!(report.stages_succeeded(), 3),
                PassStatus::Failed { stage, .. } => {
                    let failed = STAGES.iter().position(|s| *s == stage.as_str()).unwrap();
                    prop_assert!(stages.iter().all(|s| *s <= failed));
                    prop_assert_eq!(report.stages[failed].attempts, 3);
                }
                other => prop_assert!(false, "unexpected status {:?}", other),
            }
        }
    }
}

/// Runs `passes` Terra passes to completion; returns reports, stage indices
/// requested per pass and the peak number of concurrent attempts.
async fn run_passes(
    passes: usize,
    cap: usize,
    scripts: Vec<Vec<StageOutcome>>,
) -> (Vec<PassReport>, HashMap<String, Vec<usize>>, usize) {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(tracker());
    let runner = Arc::new(MockStageRunner::new());
    runner.set_delay(Duration::from_millis(1)).await;
    for (stage, outcomes) in STAGES.iter().zip(scripts) {
        runner.script(stage, outcomes).await;
    }

    let orchestrator = PassOrchestrator::new(
        OrchestratorConfig::default()
            .with_work_root(dir.path().join("work"))
            .with_max_concurrent_stages(cap)
            .with_retry(RetryConfig::immediate()),
        LocatorConfig::default(),
        Arc::clone(&tracker),
        runner.clone(),
    );
    let mut rx = orchestrator.subscribe();

    for i in 0..passes {
        let start = t0() + chrono::Duration::hours(i as i64);
        let name = terra_name(start, i);
        std::fs::write(dir.path().join(&name), b"packets").unwrap();
        tracker
            .ingest_at(fixtures::terra_event_in(dir.path(), start, &name), t0())
            .await;
    }

    for _ in 0..2000 {
        let summary = orchestrator.tick_at(t0()).await;
        if summary == TickSummary::default() && orchestrator.status().await.in_flight == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let mut reports = Vec::new();
    while let Ok(report) = rx.try_recv() {
        reports.push(report);
    }

    let mut requests: HashMap<String, Vec<usize>> = HashMap::new();
    for request in runner.requests().await {
        let index = STAGES.iter().position(|s| *s == request.stage).unwrap();
        requests
            .entry(request.pass_id.to_string())
            .or_default()
            .push(index);
    }

    (reports, requests, runner.max_concurrent())
}
