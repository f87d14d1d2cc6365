//! Input discovery and path expansion for a stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::pass::{Pass, PassId, TrackerConfig};
use crate::pipeline::StageSpec;

use super::config::LocatorConfig;
use super::template::{Template, TemplateContext, TemplateError};

/// Errors from resolving a stage's inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocatorError {
    /// Inputs are not there yet but the grace period is still running.
    #[error("waiting for input matching {pattern}")]
    Waiting { pattern: String },

    /// Inputs never appeared within the grace period.
    #[error("no input matching {pattern} after {waited_secs}s")]
    NotFound { pattern: String, waited_secs: i64 },

    #[error("invalid glob pattern {pattern}: {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl LocatorError {
    /// Whether the stage can never resolve (everything except `Waiting`).
    pub fn is_permanent(&self) -> bool {
        !matches!(self, LocatorError::Waiting { .. })
    }
}

/// Everything a stage attempt needs on disk, fully expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPaths {
    /// `work_root/{pass_id}/{stage}`.
    pub work_dir: PathBuf,
    /// `work_root/{pass_id}`.
    pub pass_dir: PathBuf,
    /// One concrete file per input template, newest match.
    pub inputs: Vec<PathBuf>,
    /// Absolute output glob patterns.
    pub outputs: Vec<String>,
    /// Program and expanded arguments.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub processed_at: DateTime<Utc>,
}

/// Resolves stage inputs and outputs from pass metadata and templates.
#[derive(Debug, Clone)]
pub struct FileLocator {
    config: LocatorConfig,
    work_root: PathBuf,
    start_nudge_mins: i64,
    end_nudge_mins: i64,
}

impl FileLocator {
    pub fn new(config: LocatorConfig, work_root: impl Into<PathBuf>, tracker: &TrackerConfig) -> Self {
        Self {
            config,
            work_root: work_root.into(),
            start_nudge_mins: tracker.start_nudge().num_minutes(),
            end_nudge_mins: tracker.end_nudge().num_minutes(),
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub fn pass_dir(&self, id: &PassId) -> PathBuf {
        self.work_root.join(id.as_str())
    }

    pub fn work_dir(&self, id: &PassId, stage: &str) -> PathBuf {
        self.pass_dir(id).join(stage)
    }

    /// Resolves inputs, outputs and the command line for one attempt of `stage`.
    ///
    /// `eligible_since` is when the stage first became runnable; missing inputs
    /// turn from `Waiting` into `NotFound` once the grace period has passed.
    pub fn resolve(
        &self,
        pass: &Pass,
        stage: &StageSpec,
        eligible_since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedPaths, LocatorError> {
        let work_dir = self.work_dir(&pass.id, &stage.name);
        let pass_dir = self.pass_dir(&pass.id);
        let base = TemplateContext::new(pass, now)
            .with_nudges(self.start_nudge_mins, self.end_nudge_mins)
            .with_dirs(&work_dir, &pass_dir);

        let mut inputs = Vec::with_capacity(stage.inputs.len());
        for source in &stage.inputs {
            let pattern = Template::parse(source)?.render(&base)?;
            match newest_match(&pattern)? {
                Some(path) => inputs.push(path),
                None => {
                    let waited = now - eligible_since;
                    if waited >= self.config.grace_period() {
                        return Err(LocatorError::NotFound {
                            pattern,
                            waited_secs: waited.num_seconds(),
                        });
                    }
                    debug!(pass_id = %pass.id, stage = %stage.name, "Waiting for {}", pattern);
                    return Err(LocatorError::Waiting { pattern });
                }
            }
        }

        let ctx = base.clone().with_io(&inputs, &[]);
        let mut outputs = Vec::with_capacity(stage.outputs.len());
        for source in &stage.outputs {
            let rendered = Template::parse(source)?.render(&ctx)?;
            let path = Path::new(&rendered);
            outputs.push(if path.is_absolute() {
                rendered
            } else {
                work_dir.join(path).to_string_lossy().into_owned()
            });
        }

        let ctx = ctx.with_io(&inputs, &outputs);
        let mut command = Vec::with_capacity(stage.command.len());
        for source in &stage.command {
            command.extend(Template::parse(source)?.render_args(&ctx)?);
        }

        let mut env = BTreeMap::new();
        for (key, source) in &stage.env {
            env.insert(key.clone(), Template::parse(source)?.render(&ctx)?);
        }

        Ok(ResolvedPaths {
            work_dir,
            pass_dir,
            inputs,
            outputs,
            command,
            env,
            processed_at: now,
        })
    }
}

/// Most recently modified file matching `pattern`.
pub(crate) fn newest_match(pattern: &str) -> Result<Option<PathBuf>, LocatorError> {
    Ok(matches_with_mtime(pattern)?
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(path, _)| path))
}

/// Regular files matching `pattern` with their modification times.
pub(crate) fn matches_with_mtime(pattern: &str) -> Result<Vec<(PathBuf, SystemTime)>, LocatorError> {
    let paths = glob::glob(pattern).map_err(|e| LocatorError::BadPattern {
        pattern: pattern.to_string(),
        reason: e.msg.to_string(),
    })?;

    Ok(paths
        .filter_map(Result::ok)
        .filter_map(|path| {
            let meta = std::fs::metadata(&path).ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect())
}
