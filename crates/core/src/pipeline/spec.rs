//! Pipeline and stage specifications.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pass::Platform;

/// A raw input role: announced files whose name matches `pattern` fill `role`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawInput {
    pub role: String,
    /// Glob matched against the file name only.
    pub pattern: String,
}

impl RawInput {
    pub fn new(role: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            pattern: pattern.into(),
        }
    }

    /// Whether `file_name` belongs to this role.
    pub fn matches(&self, file_name: &str) -> bool {
        glob::Pattern::new(&self.pattern)
            .map(|p| p.matches(file_name))
            .unwrap_or(false)
    }
}

/// One external processing step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSpec {
    /// Stage name, unique within the pipeline.
    pub name: String,

    /// Product-type tag put on outbound notifications (e.g. "1A", "1B").
    pub product: String,

    /// Program followed by argument templates.
    pub command: Vec<String>,

    /// Input templates. Each is expanded and globbed; the newest match wins.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Output templates, relative to the stage working directory unless absolute.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Hard deadline for one attempt.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of attempts (first run included).
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Exit codes treated as success.
    #[serde(default = "default_success_codes")]
    pub success_exit_codes: Vec<i32>,

    /// Disabled stages are marked skipped when the pass is created.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether artifacts of this stage are announced downstream.
    #[serde(default = "default_true")]
    pub publish: bool,

    /// When set, artifacts are moved here after a successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_dir: Option<PathBuf>,

    /// Extra environment variables for the child process (values are templates).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_retry_limit() -> u32 {
    3
}

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

fn default_true() -> bool {
    true
}

impl StageSpec {
    /// Creates a stage with defaults for everything but the essentials.
    pub fn new(name: impl Into<String>, product: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            product: product.into(),
            command,
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout_secs: default_timeout(),
            retry_limit: default_retry_limit(),
            success_exit_codes: default_success_codes(),
            enabled: true,
            publish: true,
            product_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The ordered stages for one platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSpec {
    /// Raw file roles that must all arrive before processing.
    pub raw_inputs: Vec<RawInput>,
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    /// Role whose pattern matches `file_name`, if any.
    pub fn role_for(&self, file_name: &str) -> Option<&str> {
        self.raw_inputs
            .iter()
            .find(|r| r.matches(file_name))
            .map(|r| r.role.as_str())
    }

    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    pub fn required_roles(&self) -> Vec<String> {
        self.raw_inputs.iter().map(|r| r.role.clone()).collect()
    }
}

/// Pipelines keyed by platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelinesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aqua: Option<PipelineSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terra: Option<PipelineSpec>,
}

impl PipelinesConfig {
    pub fn get(&self, platform: Platform) -> Option<&PipelineSpec> {
        match platform {
            Platform::Aqua => self.aqua.as_ref(),
            Platform::Terra => self.terra.as_ref(),
        }
    }

    pub fn set(&mut self, platform: Platform, spec: PipelineSpec) {
        match platform {
            Platform::Aqua => self.aqua = Some(spec),
            Platform::Terra => self.terra = Some(spec),
        }
    }

    /// Configured platforms with their pipelines.
    pub fn iter(&self) -> impl Iterator<Item = (Platform, &PipelineSpec)> {
        [
            (Platform::Aqua, self.aqua.as_ref()),
            (Platform::Terra, self.terra.as_ref()),
        ]
        .into_iter()
        .filter_map(|(p, spec)| spec.map(|s| (p, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_input_matches_partial_names() {
        let input = RawInput::new("modis", "P0420064AAAAAAAAAAAAAA*001.PDS");
        assert!(input.matches("P0420064AAAAAAAAAAAAAA24122101010001.PDS"));
        assert!(!input.matches("P0420064AAAAAAAAAAAAAA24122101010000.PDS"));
        assert!(!input.matches("P1540064AAAAAAAAAAAAAA24122101010001.PDS"));
    }

    #[test]
    fn test_stage_defaults() {
        let toml = r#"
            name = "decode"
            product = "1A"
            command = ["modis_L1A", "{raw:modis}"]
        "#;
        let stage: StageSpec = toml::from_str(toml).unwrap();
        assert_eq!(stage.retry_limit, 3);
        assert_eq!(stage.timeout_secs, 1800);
        assert_eq!(stage.success_exit_codes, vec![0]);
        assert!(stage.enabled);
        assert!(stage.publish);
        assert!(stage.product_dir.is_none());
    }

    #[test]
    fn test_pipeline_roles() {
        let toml = r#"
            raw_inputs = [
                { role = "modis", pattern = "P1540064*001.PDS" },
                { role = "gbad", pattern = "P1540957*001.PDS" },
            ]

            [[stages]]
            name = "decode"
            product = "1A"
            command = ["modis_L1A"]
        "#;
        let spec: PipelineSpec = toml::from_str(toml).unwrap();
        assert_eq!(spec.role_for("P1540957_X_001.PDS"), Some("gbad"));
        assert_eq!(spec.role_for("P1540064_X_001.PDS"), Some("modis"));
        assert_eq!(spec.role_for("unrelated.txt"), None);
        assert_eq!(spec.required_roles(), vec!["modis", "gbad"]);
        assert_eq!(spec.stage_index("decode"), Some(0));
    }

    #[test]
    fn test_pipelines_lookup() {
        let mut pipelines = PipelinesConfig::default();
        assert!(pipelines.get(Platform::Terra).is_none());
        pipelines.set(
            Platform::Terra,
            PipelineSpec {
                raw_inputs: vec![],
                stages: vec![],
            },
        );
        assert!(pipelines.get(Platform::Terra).is_some());
        assert_eq!(pipelines.iter().count(), 1);
    }
}
