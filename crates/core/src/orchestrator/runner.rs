//! The pass orchestrator - drives live passes through their stages.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::locator::{FileLocator, LocatorConfig, LocatorError};
use crate::metrics;
use crate::pass::{Pass, PassHandle, PassId, PassStatus, PassTracker, Platform, StageState};
use crate::pipeline::StageSpec;
use crate::publisher::ResultPublisher;
use crate::stage::{StageOutcome, StageRequest, StageRunner};

use super::config::OrchestratorConfig;
use super::types::{OrchestratorError, OrchestratorStatus, PassReport, TickSummary};

/// A finished attempt waiting for the next tick to apply it.
///
/// The admission permit travels with it, so a slot only frees up once the
/// outcome has been recorded on the pass.
struct Completion {
    pass_id: PassId,
    stage: String,
    stage_index: usize,
    attempt: u32,
    outcome: StageOutcome,
    elapsed: Duration,
    _permit: OwnedSemaphorePermit,
}

/// A pass working directory scheduled for removal.
struct Cleanup {
    pass_id: PassId,
    dir: PathBuf,
    due: DateTime<Utc>,
}

/// Result of looking at one pass during dispatch.
enum Advance {
    Idle,
    Dispatched,
    Finished(PassReport),
}

/// The pass orchestrator - drives passes through their stage pipelines.
///
/// All state changes happen inside [`tick`](Self::tick): stage attempts run on
/// spawned tasks and only report back through a channel that the next tick
/// drains. Cloning is cheap and every clone drives the same passes.
#[derive(Clone)]
pub struct PassOrchestrator {
    config: OrchestratorConfig,
    tracker: Arc<PassTracker>,
    locator: FileLocator,
    runner: Arc<dyn StageRunner>,
    publisher: Option<Arc<ResultPublisher>>,
    audit: Option<AuditHandle>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    wake: Arc<Notify>,
    permits: Arc<Semaphore>,
    tick_lock: Arc<Mutex<()>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: Arc<Mutex<mpsc::UnboundedReceiver<Completion>>>,
    cancels: Arc<Mutex<HashMap<PassId, CancellationToken>>>,
    cleanups: Arc<Mutex<Vec<Cleanup>>>,
    last_sweep: Arc<Mutex<Option<DateTime<Utc>>>>,
    reports_tx: broadcast::Sender<PassReport>,
    reports_sent: Arc<AtomicU64>,
}

impl PassOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        locator_config: LocatorConfig,
        tracker: Arc<PassTracker>,
        runner: Arc<dyn StageRunner>,
    ) -> Self {
        let locator = FileLocator::new(locator_config, config.work_root.clone(), tracker.config());
        let (shutdown_tx, _) = broadcast::channel(1);
        let (reports_tx, _) = broadcast::channel(config.report_channel_capacity.max(1));
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_stages)),
            config,
            tracker,
            locator,
            runner,
            publisher: None,
            audit: None,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            wake: Arc::new(Notify::new()),
            tick_lock: Arc::new(Mutex::new(())),
            completions_tx,
            completions_rx: Arc::new(Mutex::new(completions_rx)),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            cleanups: Arc::new(Mutex::new(Vec::new())),
            last_sweep: Arc::new(Mutex::new(None)),
            reports_tx,
            reports_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<ResultPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<PassTracker> {
        &self.tracker
    }

    pub fn locator(&self) -> &FileLocator {
        &self.locator
    }

    /// Receives every pass report sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PassReport> {
        self.reports_tx.subscribe()
    }

    /// The notifier the loop waits on; hand it to the trigger listener.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Wakes the loop for an immediate re-check.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Start the orchestrator (spawns the tick loop).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!(
            max_concurrent_stages = self.config.max_concurrent_stages,
            work_root = %self.config.work_root.display(),
            "Starting pass orchestrator"
        );

        let this = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!("Orchestrator loop started");
            let interval = Duration::from_millis(this.config.tick_interval_ms);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Orchestrator loop received shutdown signal");
                        break;
                    }
                    _ = this.wake.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let summary = this.tick().await;
                if summary != TickSummary::default() {
                    debug!(
                        completed = summary.completed,
                        dispatched = summary.dispatched,
                        finished = summary.finished,
                        cleaned = summary.cleaned,
                        "Tick"
                    );
                }
            }
            info!("Orchestrator loop stopped");
        });
    }

    /// Stop the orchestrator gracefully.
    ///
    /// Running stage attempts are cancelled, which kills their process groups.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping pass orchestrator");
        let _ = self.shutdown_tx.send(());

        for token in self.cancels.lock().await.values() {
            token.cancel();
        }

        // Give cancelled stages a moment to reap their children
        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("Pass orchestrator stopped");
    }

    /// Get current orchestrator status.
    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            live_passes: self.tracker.len().await,
            in_flight: self
                .config
                .max_concurrent_stages
                .saturating_sub(self.permits.available_permits()),
            max_concurrent_stages: self.config.max_concurrent_stages,
            pending_cleanups: self.cleanups.lock().await.len(),
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
        }
    }

    /// Advances every live pass as far as it can go right now.
    pub async fn tick(&self) -> TickSummary {
        self.tick_at(Utc::now()).await
    }

    /// [`tick`](Self::tick) with an explicit clock.
    ///
    /// Order: apply finished attempts, sweep stale passes and expired working
    /// directories, then dispatch passes oldest first.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickSummary {
        let _guard = self.tick_lock.lock().await;
        let mut summary = TickSummary::default();

        let completions: Vec<Completion> = {
            let mut rx = self.completions_rx.lock().await;
            let mut drained = Vec::new();
            while let Ok(completion) = rx.try_recv() {
                drained.push(completion);
            }
            drained
        };
        for completion in completions {
            summary.completed += 1;
            if let Some(report) = self.apply_completion(completion, now).await {
                if self.finish(report, now).await {
                    summary.finished += 1;
                }
            }
        }

        summary.finished += self.sweep(now).await;
        summary.cleaned = self.clean_work_dirs(now).await;

        for handle in self.tracker.handles().await {
            match self.advance(&handle, now).await {
                Advance::Idle => {}
                Advance::Dispatched => summary.dispatched += 1,
                Advance::Finished(report) => {
                    if self.finish(report, now).await {
                        summary.finished += 1;
                    }
                }
            }
        }

        summary
    }

    /// Aborts a live pass: cancels its running stage and skips the rest.
    pub async fn abort(&self, id: &PassId, reason: &str) -> Result<PassReport, OrchestratorError> {
        let _guard = self.tick_lock.lock().await;
        let handle = self
            .tracker
            .handle(id)
            .await
            .ok_or_else(|| OrchestratorError::PassNotFound(id.clone()))?;
        let now = Utc::now();

        let report = {
            let mut pass = handle.lock().await;
            if pass.status.is_terminal() {
                return Err(OrchestratorError::AlreadyFinished {
                    pass_id: id.clone(),
                    status: pass.status.status_type().to_string(),
                });
            }
            if let Some(token) = self.cancels.lock().await.remove(id) {
                token.cancel();
            }
            pass.skip_remaining();
            pass.status = PassStatus::Aborted {
                reason: reason.to_string(),
            };
            pass.touch(now);
            PassReport::from_pass(&pass, now)
        };

        warn!(pass_id = %id, "Aborted pass: {}", reason);
        if !self.finish(report.clone(), now).await {
            return Err(OrchestratorError::PassNotFound(id.clone()));
        }
        Ok(report)
    }

    fn stage_spec(&self, platform: Platform, index: usize) -> Option<StageSpec> {
        self.tracker
            .pipelines()
            .get(platform)?
            .stages
            .get(index)
            .cloned()
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.emit(event).await;
        }
    }

    /// Looks at one pass and launches its current stage if it can run.
    async fn advance(&self, handle: &PassHandle, now: DateTime<Utc>) -> Advance {
        let mut pass = handle.lock().await;
        if pass.status.is_terminal() || !pass.is_ready() {
            return Advance::Idle;
        }
        let Some(index) = pass.current_stage_index() else {
            return Advance::Idle;
        };
        match &pass.stages[index].state {
            StageState::Pending => {}
            StageState::Failed {
                retry_at: Some(at), ..
            } if *at <= now => {}
            _ => return Advance::Idle,
        }

        let Some(spec) = self.stage_spec(pass.platform, index) else {
            let error = OrchestratorError::MissingPipeline(pass.platform);
            let attempts = pass.stages[index].attempts;
            return Advance::Finished(
                self.fail_pass(&mut pass, index, attempts, error.to_string(), now)
                    .await,
            );
        };
        let eligible_since = *pass.stages[index].eligible_since.get_or_insert(now);

        let resolved = match self.locator.resolve(&pass, &spec, eligible_since, now) {
            Ok(resolved) => resolved,
            Err(LocatorError::Waiting { .. }) => return Advance::Idle,
            Err(e) => {
                let attempts = pass.stages[index].attempts;
                return Advance::Finished(
                    self.fail_pass(&mut pass, index, attempts, e.to_string(), now)
                        .await,
                );
            }
        };

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            debug!(pass_id = %pass.id, stage = %spec.name, "No stage slot free");
            pass.waiting_for_slot.get_or_insert(now);
            return Advance::Idle;
        };
        pass.waiting_for_slot = None;

        let record = &mut pass.stages[index];
        record.attempts += 1;
        let attempt = record.attempts;
        record.state = StageState::Running {
            attempt,
            started_at: now,
        };
        pass.touch(now);

        let request = StageRequest {
            pass_id: pass.id.clone(),
            stage: spec.name.clone(),
            attempt,
            command: resolved.command,
            work_dir: resolved.work_dir,
            env: resolved.env,
            outputs: resolved.outputs,
            timeout: spec.timeout(),
            success_exit_codes: spec.success_exit_codes.clone(),
            product_dir: spec.product_dir.clone(),
        };
        drop(pass);

        self.launch(request, index, permit).await;
        Advance::Dispatched
    }

    async fn launch(&self, request: StageRequest, stage_index: usize, permit: OwnedSemaphorePermit) {
        let token = CancellationToken::new();
        self.cancels
            .lock()
            .await
            .insert(request.pass_id.clone(), token.clone());
        metrics::RUNNING_STAGES.inc();

        info!(
            pass_id = %request.pass_id,
            stage = %request.stage,
            attempt = request.attempt,
            "Starting stage: {}", request.command.join(" ")
        );
        self.emit(AuditEvent::StageStarted {
            pass_id: request.pass_id.to_string(),
            stage: request.stage.clone(),
            attempt: request.attempt,
            command: request.command.clone(),
        })
        .await;

        let runner = Arc::clone(&self.runner);
        let tx = self.completions_tx.clone();
        let wake = Arc::clone(&self.wake);
        tokio::spawn(async move {
            let started = Instant::now();
            let pass_id = request.pass_id.clone();
            let stage = request.stage.clone();
            let attempt = request.attempt;

            let outcome = runner.run(request, token).await;

            let completion = Completion {
                pass_id,
                stage,
                stage_index,
                attempt,
                outcome,
                elapsed: started.elapsed(),
                _permit: permit,
            };
            if tx.send(completion).is_err() {
                warn!("Orchestrator dropped; stage outcome discarded");
            }
            wake.notify_one();
        });
    }

    /// Records a finished attempt on its pass. Returns a report if the pass is now terminal.
    async fn apply_completion(&self, completion: Completion, now: DateTime<Utc>) -> Option<PassReport> {
        metrics::RUNNING_STAGES.dec();
        metrics::STAGE_RUNS
            .with_label_values(&[completion.stage.as_str(), completion.outcome.outcome_type()])
            .inc();
        metrics::STAGE_DURATION
            .with_label_values(&[completion.stage.as_str()])
            .observe(completion.elapsed.as_secs_f64());

        self.cancels.lock().await.remove(&completion.pass_id);

        let Some(handle) = self.tracker.handle(&completion.pass_id).await else {
            debug!(
                pass_id = %completion.pass_id,
                stage = %completion.stage,
                "Discarding outcome for finished pass"
            );
            return None;
        };

        let index = completion.stage_index;
        let attempt = completion.attempt;
        let mut pass = handle.lock().await;
        let current = matches!(
            pass.stages.get(index).map(|s| &s.state),
            Some(StageState::Running { attempt: a, .. }) if *a == attempt
        );
        if !current || pass.status.is_terminal() {
            debug!(pass_id = %pass.id, stage = %completion.stage, "Discarding stale outcome");
            return None;
        }
        let Some(spec) = self.stage_spec(pass.platform, index) else {
            let reason = OrchestratorError::MissingPipeline(pass.platform).to_string();
            return Some(self.fail_pass(&mut pass, index, attempt, reason, now).await);
        };
        let elapsed_ms = completion.elapsed.as_millis() as u64;

        match completion.outcome {
            StageOutcome::Completed { artifacts } => {
                pass.stages[index].state = StageState::Succeeded {
                    artifacts: artifacts.clone(),
                };
                pass.touch(now);
                info!(
                    pass_id = %pass.id,
                    stage = %spec.name,
                    attempt,
                    "Stage succeeded with {} artifact(s) in {}ms", artifacts.len(), elapsed_ms
                );
                self.emit(AuditEvent::StageSucceeded {
                    pass_id: pass.id.to_string(),
                    stage: spec.name.clone(),
                    attempt,
                    artifacts: artifacts
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                    duration_ms: elapsed_ms,
                })
                .await;

                let report = if pass.all_stages_done() {
                    pass.status = PassStatus::Succeeded;
                    Some(PassReport::from_pass(&pass, now))
                } else {
                    None
                };
                let snapshot: Pass = pass.clone();
                drop(pass);

                if let Some(ref publisher) = self.publisher {
                    publisher.publish(&snapshot, &spec, &artifacts).await;
                }
                report
            }
            StageOutcome::Cancelled => {
                // Cancelled by shutdown rather than abort: the attempt does not count.
                let record = &mut pass.stages[index];
                record.attempts = record.attempts.saturating_sub(1);
                record.state = StageState::Pending;
                info!(pass_id = %pass.id, stage = %spec.name, "Stage cancelled");
                None
            }
            outcome if outcome.is_transient() && attempt < spec.retry_limit => {
                let reason = outcome.describe();
                let retry_at = now + self.config.retry.delay(attempt);
                pass.stages[index].state = StageState::Failed {
                    reason: reason.clone(),
                    attempt_count: attempt,
                    retry_at: Some(retry_at),
                };
                pass.touch(now);
                warn!(
                    pass_id = %pass.id,
                    stage = %spec.name,
                    attempt,
                    retry_at = %retry_at,
                    "Stage attempt failed: {}", reason
                );
                self.emit(AuditEvent::StageFailed {
                    pass_id: pass.id.to_string(),
                    stage: spec.name.clone(),
                    attempt,
                    reason,
                    will_retry: true,
                })
                .await;
                None
            }
            outcome => {
                Some(
                    self.fail_pass(&mut pass, index, attempt, outcome.describe(), now)
                        .await,
                )
            }
        }
    }

    /// Marks a stage terminally failed and with it the pass.
    async fn fail_pass(
        &self,
        pass: &mut Pass,
        index: usize,
        attempt_count: u32,
        reason: String,
        now: DateTime<Utc>,
    ) -> PassReport {
        let stage = pass.stages[index].name.clone();
        pass.stages[index].state = StageState::Failed {
            reason: reason.clone(),
            attempt_count,
            retry_at: None,
        };
        pass.status = PassStatus::Failed {
            stage: stage.clone(),
            reason: reason.clone(),
        };
        pass.touch(now);

        error!(pass_id = %pass.id, stage = %stage, "Stage failed permanently: {}", reason);
        self.emit(AuditEvent::StageFailed {
            pass_id: pass.id.to_string(),
            stage,
            attempt: attempt_count,
            reason,
            will_retry: false,
        })
        .await;
        PassReport::from_pass(pass, now)
    }

    /// Evicts a terminal pass and sends its report. False if it was already gone.
    async fn finish(&self, report: PassReport, now: DateTime<Utc>) -> bool {
        if self.tracker.evict(&report.pass_id, now).await.is_none() {
            return false;
        }
        self.report(report, now).await;
        true
    }

    async fn report(&self, report: PassReport, now: DateTime<Utc>) {
        let pass_id = report.pass_id.to_string();
        let event = match &report.status {
            PassStatus::Succeeded => {
                info!(pass_id = %pass_id, "Pass completed in {}ms", report.duration_ms());
                AuditEvent::PassCompleted {
                    pass_id,
                    stages_run: report.stages_succeeded(),
                    duration_ms: report.duration_ms(),
                }
            }
            PassStatus::Failed { stage, reason } => AuditEvent::PassFailed {
                pass_id,
                stage: stage.clone(),
                reason: reason.clone(),
            },
            PassStatus::Aborted { reason } => AuditEvent::PassAborted {
                pass_id,
                reason: reason.clone(),
            },
            PassStatus::Abandoned | PassStatus::Active => AuditEvent::PassAbandoned {
                pass_id,
                idle_secs: (report.finished_at - report.last_updated_at).num_seconds(),
            },
        };
        self.emit(event).await;
        metrics::PASSES_FINISHED
            .with_label_values(&[report.status.status_type()])
            .inc();

        self.cleanups.lock().await.push(Cleanup {
            pass_id: report.pass_id.clone(),
            dir: self.locator.pass_dir(&report.pass_id),
            due: now + self.retention(),
        });

        self.reports_sent.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine
        let _ = self.reports_tx.send(report);
    }

    /// Abandons stale passes at most once per sweep interval.
    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        {
            let interval = chrono::Duration::seconds(self.tracker.config().sweep_interval_secs as i64);
            let mut last = self.last_sweep.lock().await;
            if last.is_some_and(|t| now - t < interval) {
                return 0;
            }
            *last = Some(now);
        }

        let stale = self.tracker.sweep_stale(now).await;
        let count = stale.len();
        for pass in stale {
            warn!(
                pass_id = %pass.id,
                idle_secs = (now - pass.last_updated_at).num_seconds(),
                "Abandoned stale pass"
            );
            self.report(PassReport::from_pass(&pass, now), now).await;
        }
        count
    }

    /// Removes working directories whose retention has expired.
    async fn clean_work_dirs(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<Cleanup> = {
            let mut cleanups = self.cleanups.lock().await;
            let (due, keep): (Vec<_>, Vec<_>) = cleanups.drain(..).partition(|c| c.due <= now);
            *cleanups = keep;
            due
        };

        let mut removed = 0;
        let mut deferred = Vec::new();
        for mut cleanup in due {
            // A new pass for the same window reuses the directory.
            if self.tracker.handle(&cleanup.pass_id).await.is_some() {
                cleanup.due = now + self.retention();
                deferred.push(cleanup);
                continue;
            }
            match tokio::fs::remove_dir_all(&cleanup.dir).await {
                Ok(()) => {
                    debug!("Removed working directory {}", cleanup.dir.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", cleanup.dir.display(), e),
            }
        }
        if !deferred.is_empty() {
            self.cleanups.lock().await.extend(deferred);
        }
        removed
    }

    fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.working_dir_retention_secs as i64)
    }
}
