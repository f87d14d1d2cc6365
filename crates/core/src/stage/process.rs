//! Stage runner backed by child processes.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::locator::matches_with_mtime;

use super::config::StageRunnerConfig;
use super::error::StageError;
use super::traits::StageRunner;
use super::types::{LaunchErrorKind, StageOutcome, StageRequest};

enum Exit {
    Status(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

/// Exit code reported when the child's status could not be collected.
const WAIT_FAILED_CODE: i32 = -1;

/// Runs each stage as its own process group in the stage working directory.
pub struct ProcessStageRunner {
    config: StageRunnerConfig,
}

impl ProcessStageRunner {
    pub fn new(config: StageRunnerConfig) -> Self {
        Self { config }
    }

    async fn execute(
        &self,
        request: &StageRequest,
        cancel: CancellationToken,
    ) -> Result<StageOutcome, StageError> {
        let (program, args) = request
            .command
            .split_first()
            .ok_or(StageError::EmptyCommand)?;

        fs::create_dir_all(&request.work_dir)
            .await
            .map_err(|source| StageError::WorkDir {
                path: request.work_dir.clone(),
                source,
            })?;

        let before = snapshot(&request.outputs);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&request.work_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(StageOutcome::launch_error(
                    LaunchErrorKind::from_io(&e),
                    format!("{}: {}", program, e),
                ))
            }
        };

        debug!(
            pass_id = %request.pass_id,
            stage = %request.stage,
            pid = ?child.id(),
            "Spawned {}", program
        );

        let stdout = child
            .stdout
            .take()
            .map(|s| self.capture(s, request, "stdout"));
        let stderr = child
            .stderr
            .take()
            .map(|s| self.capture(s, request, "stderr"));

        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Exit::Status(status),
                Err(e) => Exit::WaitFailed(e),
            },
            _ = tokio::time::sleep(request.timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        if !matches!(exit, Exit::Status(_)) {
            terminate(&mut child).await;
        }

        let _ = self.drain(stdout).await;
        let stderr_tail = self.drain(stderr).await;

        let status = match exit {
            Exit::TimedOut => {
                warn!(
                    pass_id = %request.pass_id,
                    stage = %request.stage,
                    "Timed out after {:?}; stderr tail:\n{}",
                    request.timeout,
                    stderr_tail.join("\n")
                );
                return Ok(StageOutcome::TimedOut);
            }
            Exit::Cancelled => return Ok(StageOutcome::Cancelled),
            Exit::WaitFailed(e) => return Ok(wait_failed(request, &e)),
            Exit::Status(status) => status,
        };

        let code = exit_code(&status);
        if !request.success_exit_codes.contains(&code) {
            warn!(
                pass_id = %request.pass_id,
                stage = %request.stage,
                "Exited with code {}; stderr tail:\n{}",
                code,
                stderr_tail.join("\n")
            );
            return Ok(StageOutcome::NonZeroExit { code });
        }

        let artifacts = new_artifacts(&request.outputs, &before);
        if artifacts.is_empty() {
            warn!(
                pass_id = %request.pass_id,
                stage = %request.stage,
                "Exit code {} accepted but nothing matched {:?}",
                code,
                request.outputs
            );
            return Ok(StageOutcome::ArtifactMissing);
        }

        let artifacts = match &request.product_dir {
            Some(dir) => place_artifacts(artifacts, dir).await?,
            None => artifacts,
        };
        Ok(StageOutcome::completed(artifacts))
    }

    /// Streams one pipe line by line, keeping only the last `capture_lines` lines.
    fn capture<R>(&self, reader: R, request: &StageRequest, stream: &'static str) -> JoinHandle<Vec<String>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capacity = self.config.capture_lines;
        let log_output = self.config.log_output;
        let pass_id = request.pass_id.clone();
        let stage = request.stage.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut tail = VecDeque::with_capacity(capacity);
            while let Ok(Some(line)) = lines.next_line().await {
                if log_output {
                    info!(pass_id = %pass_id, stage = %stage, stream, "{}", line);
                }
                if capacity == 0 {
                    continue;
                }
                if tail.len() == capacity {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect()
        })
    }

    async fn drain(&self, handle: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
        let Some(handle) = handle else {
            return Vec::new();
        };
        let limit = Duration::from_secs(self.config.drain_timeout_secs);
        match timeout(limit, handle).await {
            Ok(Ok(lines)) => lines,
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl StageRunner for ProcessStageRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, request: StageRequest, cancel: CancellationToken) -> StageOutcome {
        let start = Instant::now();
        let outcome = match self.execute(&request, cancel).await {
            Ok(outcome) => outcome,
            Err(e) if !e.is_placement() => {
                StageOutcome::launch_error(LaunchErrorKind::Other, e.to_string())
            }
            Err(e) => {
                warn!(
                    pass_id = %request.pass_id,
                    stage = %request.stage,
                    "Failed to collect artifacts: {}", e
                );
                StageOutcome::ArtifactMissing
            }
        };

        debug!(
            pass_id = %request.pass_id,
            stage = %request.stage,
            attempt = request.attempt,
            outcome = outcome.outcome_type(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stage attempt finished"
        );
        outcome
    }
}

/// Kills the child's whole process group, then the child itself.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child leads its own group (process_group(0)), so this reaches its descendants too.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

fn wait_failed(request: &StageRequest, error: &std::io::Error) -> StageOutcome {
    warn!(
        pass_id = %request.pass_id,
        stage = %request.stage,
        "Lost track of the process exit status: {}", error
    );
    StageOutcome::NonZeroExit {
        code: WAIT_FAILED_CODE,
    }
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn snapshot(patterns: &[String]) -> HashMap<PathBuf, SystemTime> {
    let mut seen = HashMap::new();
    for pattern in patterns {
        match matches_with_mtime(pattern) {
            Ok(found) => seen.extend(found),
            Err(e) => warn!("Skipping output pattern: {}", e),
        }
    }
    seen
}

/// Files matching `patterns` that are new or modified compared to `before`.
fn new_artifacts(patterns: &[String], before: &HashMap<PathBuf, SystemTime>) -> Vec<PathBuf> {
    let mut artifacts: Vec<PathBuf> = snapshot(patterns)
        .into_iter()
        .filter(|(path, modified)| before.get(path) != Some(modified))
        .map(|(path, _)| path)
        .collect();
    artifacts.sort();
    artifacts
}

async fn place_artifacts(artifacts: Vec<PathBuf>, dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|source| StageError::ProductDir {
            path: dir.to_path_buf(),
            source,
        })?;
    let mut placed = Vec::with_capacity(artifacts.len());
    for source in artifacts {
        let Some(name) = source.file_name() else {
            continue;
        };
        let destination = dir.join(name);
        move_file(&source, &destination).await?;
        placed.push(destination);
    }
    Ok(placed)
}

/// Renames, falling back to copy and delete across filesystems.
async fn move_file(source: &Path, destination: &Path) -> Result<(), StageError> {
    let failed = |e| StageError::move_failed(source.to_path_buf(), destination.to_path_buf(), e);
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) => {
            fs::copy(source, destination).await.map_err(failed)?;
            fs::remove_file(source).await.map_err(failed)?;
            Ok(())
        }
        Err(e) => Err(failed(e)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn request(work: &Path, script: &str) -> StageRequest {
        StageRequest {
            pass_id: "terra_202412210101".into(),
            stage: "decode".to_string(),
            attempt: 1,
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            work_dir: work.to_path_buf(),
            env: BTreeMap::new(),
            outputs: vec![work.join("*.L1A_LAC").to_string_lossy().into_owned()],
            timeout: Duration::from_secs(10),
            success_exit_codes: vec![0],
            product_dir: None,
        }
    }

    fn runner() -> ProcessStageRunner {
        ProcessStageRunner::new(StageRunnerConfig {
            capture_lines: 5,
            log_output: false,
            drain_timeout_secs: 10,
        })
    }

    #[tokio::test]
    async fn test_completed_with_artifact() {
        let work = TempDir::new().unwrap();
        let outcome = runner()
            .run(
                request(work.path(), "echo data > T2024356.L1A_LAC"),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(
            outcome,
            StageOutcome::completed(vec![work.path().join("T2024356.L1A_LAC")])
        );
    }

    #[tokio::test]
    async fn test_zero_exit_without_output_is_artifact_missing() {
        let work = TempDir::new().unwrap();
        let outcome = runner()
            .run(request(work.path(), "echo done"), CancellationToken::new())
            .await;
        assert_eq!(outcome, StageOutcome::ArtifactMissing);
    }

    #[tokio::test]
    async fn test_stale_output_is_not_new() {
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("old.L1A_LAC"), "old").unwrap();
        let outcome = runner()
            .run(request(work.path(), "true"), CancellationToken::new())
            .await;
        assert_eq!(outcome, StageOutcome::ArtifactMissing);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let work = TempDir::new().unwrap();
        let outcome = runner()
            .run(
                request(work.path(), "echo broken >&2; exit 3"),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, StageOutcome::NonZeroExit { code: 3 });
    }

    #[tokio::test]
    async fn test_accepted_exit_codes() {
        let work = TempDir::new().unwrap();
        let mut req = request(work.path(), "touch a.L1A_LAC; exit 1");
        req.success_exit_codes = vec![0, 1];
        let outcome = runner().run(req, CancellationToken::new()).await;
        assert!(matches!(outcome, StageOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let work = TempDir::new().unwrap();
        let mut req = request(work.path(), "sleep 30 & sleep 30");
        req.timeout = Duration::from_millis(200);

        let start = Instant::now();
        let outcome = runner().run(req, CancellationToken::new()).await;
        assert_eq!(outcome, StageOutcome::TimedOut);
        // The background sleep holds the pipes; only a group kill releases them early.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_stops_process() {
        let work = TempDir::new().unwrap();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let outcome = runner()
            .run(request(work.path(), "sleep 30"), token)
            .await;
        assert_eq!(outcome, StageOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let work = TempDir::new().unwrap();
        let mut req = request(work.path(), "");
        req.command = vec!["/nonexistent/modis_L1A".to_string()];
        let outcome = runner().run(req, CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            StageOutcome::LaunchError {
                kind: LaunchErrorKind::NotFound,
                ..
            }
        ));
        assert!(!outcome.is_transient());
    }

    #[tokio::test]
    async fn test_large_output_does_not_block() {
        let work = TempDir::new().unwrap();
        let outcome = runner()
            .run(
                request(
                    work.path(),
                    "i=0; while [ $i -lt 20000 ]; do echo line $i; echo err $i >&2; i=$((i+1)); done; touch x.L1A_LAC",
                ),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(outcome, StageOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_artifacts_move_to_product_dir() {
        let work = TempDir::new().unwrap();
        let products = TempDir::new().unwrap();
        let mut req = request(work.path(), "echo x > T1.L1A_LAC");
        req.product_dir = Some(products.path().join("level1"));

        let outcome = runner().run(req, CancellationToken::new()).await;
        let expected = products.path().join("level1/T1.L1A_LAC");
        assert_eq!(outcome, StageOutcome::completed(vec![expected.clone()]));
        assert!(expected.exists());
        assert!(!work.path().join("T1.L1A_LAC").exists());
    }

    #[tokio::test]
    async fn test_env_and_work_dir() {
        let work = TempDir::new().unwrap();
        let nested = work.path().join("pass/decode");
        let mut req = request(&nested, "echo $MODIS_MISSION > out.L1A_LAC");
        req.env.insert("MODIS_MISSION".to_string(), "T".to_string());

        let outcome = runner().run(req, CancellationToken::new()).await;
        assert!(matches!(outcome, StageOutcome::Completed { .. }));
        let content = std::fs::read_to_string(nested.join("out.L1A_LAC")).unwrap();
        assert_eq!(content.trim(), "T");
    }

    #[test]
    fn test_lost_exit_status_is_retryable() {
        let work = TempDir::new().unwrap();
        let error = std::io::Error::new(std::io::ErrorKind::Other, "no child processes");
        let outcome = wait_failed(&request(work.path(), "true"), &error);
        assert_eq!(outcome, StageOutcome::NonZeroExit { code: -1 });
        assert!(outcome.is_transient());
    }

    #[tokio::test]
    async fn test_unplaceable_artifact_is_missing() {
        let work = TempDir::new().unwrap();
        let blocker = work.path().join("products");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mut req = request(work.path(), "touch T2024356.L1A_LAC");
        req.product_dir = Some(blocker.join("1A"));
        let outcome = runner().run(req, CancellationToken::new()).await;
        assert_eq!(outcome, StageOutcome::ArtifactMissing);
    }

    #[tokio::test]
    async fn test_no_declared_outputs_is_artifact_missing() {
        let work = TempDir::new().unwrap();
        let mut req = request(work.path(), "true");
        req.outputs.clear();
        let outcome = runner().run(req, CancellationToken::new()).await;
        assert_eq!(outcome, StageOutcome::ArtifactMissing);
    }
}
