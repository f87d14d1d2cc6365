//! Mock stage runner for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::stage::{StageOutcome, StageRequest, StageRunner};

/// Mock implementation of the StageRunner trait.
///
/// Provides controllable behavior for testing:
/// - Script outcomes per stage, consumed in order
/// - Record every request for assertions
/// - Simulate slow stages and observe peak concurrency
///
/// A stage with no scripted outcome left completes. A `Completed` outcome
/// with no artifacts writes `{work_dir}/{stage}.out` and reports that file,
/// so later stages can find it through `{artifact:STAGE}`.
///
/// # Example
///
/// ```rust,ignore
/// use modis_runner_core::testing::MockStageRunner;
///
/// let runner = MockStageRunner::new();
/// runner.script("decode", vec![StageOutcome::TimedOut]).await;
///
/// // First decode attempt times out, the second one completes.
/// let requests = runner.requests().await;
/// ```
#[derive(Debug, Default)]
pub struct MockStageRunner {
    scripts: Arc<RwLock<HashMap<String, VecDeque<StageOutcome>>>>,
    requests: Arc<RwLock<Vec<StageRequest>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockStageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues outcomes for the next attempts of `stage`.
    pub async fn script(&self, stage: &str, outcomes: Vec<StageOutcome>) {
        self.scripts
            .write()
            .await
            .entry(stage.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Every attempt sleeps this long before returning (cancellable).
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn requests(&self) -> Vec<StageRequest> {
        self.requests.read().await.clone()
    }

    /// Attempts made for one stage, in order.
    pub async fn requests_for(&self, stage: &str) -> Vec<StageRequest> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    pub async fn run_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Highest number of attempts that were running at once.
    pub fn max_concurrent(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    async fn next_outcome(&self, stage: &str) -> StageOutcome {
        self.scripts
            .write()
            .await
            .get_mut(stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| StageOutcome::completed(Vec::new()))
    }

    fn write_artifact(request: &StageRequest) -> StageOutcome {
        let path: PathBuf = request.work_dir.join(format!("{}.out", request.stage));
        let written = std::fs::create_dir_all(&request.work_dir)
            .and_then(|_| std::fs::write(&path, request.command.join(" ")));
        match written {
            Ok(()) => StageOutcome::completed(vec![path]),
            Err(_) => StageOutcome::ArtifactMissing,
        }
    }
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StageRunner for MockStageRunner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, request: StageRequest, cancel: CancellationToken) -> StageOutcome {
        let now_running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        let _guard = RunningGuard(Arc::clone(&self.current));

        self.requests.write().await.push(request.clone());
        let outcome = self.next_outcome(&request.stage).await;

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return StageOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return StageOutcome::Cancelled;
        }

        match outcome {
            StageOutcome::Completed { artifacts } if artifacts.is_empty() => {
                Self::write_artifact(&request)
            }
            other => other,
        }
    }
}
