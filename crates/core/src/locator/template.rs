//! Filename and command templates.
//!
//! Templates are plain strings with `{name}` or `{name:arg}` placeholders:
//!
//! | Placeholder | Expands to |
//! |---|---|
//! | `{platform}` | platform slug (`aqua`, `terra`) |
//! | `{platform_name}` | `EOS-Aqua`, `EOS-Terra` |
//! | `{mission}` | `A` or `T` |
//! | `{pass_id}` | pass identifier |
//! | `{orbit}` | orbit number |
//! | `{start_time}`, `{start_time:FMT}` | pass start time, chrono format (default `%Y%m%d%H%M%S`) |
//! | `{processed_at}`, `{processed_at:FMT}` | time the attempt was prepared |
//! | `{start_nudge}`, `{end_nudge}` | merge tolerance in minutes |
//! | `{work_dir}`, `{pass_dir}` | stage and pass working directories |
//! | `{raw:ROLE}` | raw file recorded for a role |
//! | `{artifact:STAGE}` | first artifact of an earlier stage |
//! | `{env:VAR}` | environment variable |
//! | `{input:N}`, `{output:N}` | resolved stage input / output pattern (commands only) |
//! | `{inputs}` | every input as its own argument (whole argument only) |

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;

use crate::pass::Pass;

const DEFAULT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([a-z_]+)(?::([^{}]*))?\}").expect("placeholder pattern is valid")
});

/// Errors from parsing or rendering a template.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("malformed template '{template}': {reason}")]
    Syntax { template: String, reason: String },

    #[error("unknown placeholder '{{{name}}}'")]
    UnknownPlaceholder { name: String },

    #[error("placeholder '{{{name}}}' requires an argument")]
    MissingArgument { name: String },

    #[error("no value for '{placeholder}'")]
    MissingValue { placeholder: String },
}

impl TemplateError {
    fn missing(placeholder: impl Into<String>) -> Self {
        Self::MissingValue {
            placeholder: placeholder.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Placeholder {
    Platform,
    PlatformName,
    Mission,
    PassId,
    Orbit,
    StartTime(String),
    ProcessedAt(String),
    StartNudge,
    EndNudge,
    WorkDir,
    PassDir,
    Raw(String),
    Artifact(String),
    Env(String),
    Input(usize),
    Output(usize),
    Inputs,
}

impl Placeholder {
    fn parse(name: &str, arg: Option<&str>) -> Result<Self, TemplateError> {
        let required = |arg: Option<&str>| -> Result<String, TemplateError> {
            match arg {
                Some(a) if !a.is_empty() => Ok(a.to_string()),
                _ => Err(TemplateError::MissingArgument {
                    name: name.to_string(),
                }),
            }
        };
        let index = |arg: Option<&str>| -> Result<usize, TemplateError> {
            required(arg)?
                .parse()
                .map_err(|_| TemplateError::Syntax {
                    template: format!("{{{}:{}}}", name, arg.unwrap_or_default()),
                    reason: "index must be a non-negative integer".to_string(),
                })
        };
        let format = arg
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_TIME_FORMAT)
            .to_string();

        Ok(match name {
            "platform" => Placeholder::Platform,
            "platform_name" => Placeholder::PlatformName,
            "mission" => Placeholder::Mission,
            "pass_id" => Placeholder::PassId,
            "orbit" => Placeholder::Orbit,
            "start_time" => Placeholder::StartTime(format),
            "processed_at" => Placeholder::ProcessedAt(format),
            "start_nudge" => Placeholder::StartNudge,
            "end_nudge" => Placeholder::EndNudge,
            "work_dir" => Placeholder::WorkDir,
            "pass_dir" => Placeholder::PassDir,
            "raw" => Placeholder::Raw(required(arg)?),
            "artifact" => Placeholder::Artifact(required(arg)?),
            "env" => Placeholder::Env(required(arg)?),
            "input" => Placeholder::Input(index(arg)?),
            "output" => Placeholder::Output(index(arg)?),
            "inputs" => Placeholder::Inputs,
            other => {
                return Err(TemplateError::UnknownPlaceholder {
                    name: other.to_string(),
                })
            }
        })
    }

    fn is_command_only(&self) -> bool {
        matches!(
            self,
            Placeholder::Input(_) | Placeholder::Output(_) | Placeholder::Inputs
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Values available while rendering a template for one pass and stage.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub pass: &'a Pass,
    pub processed_at: DateTime<Utc>,
    pub start_nudge_mins: i64,
    pub end_nudge_mins: i64,
    pub work_dir: Option<&'a Path>,
    pub pass_dir: Option<&'a Path>,
    pub inputs: &'a [PathBuf],
    pub outputs: &'a [String],
}

impl<'a> TemplateContext<'a> {
    pub fn new(pass: &'a Pass, processed_at: DateTime<Utc>) -> Self {
        Self {
            pass,
            processed_at,
            start_nudge_mins: 0,
            end_nudge_mins: 0,
            work_dir: None,
            pass_dir: None,
            inputs: &[],
            outputs: &[],
        }
    }

    pub fn with_nudges(mut self, start_mins: i64, end_mins: i64) -> Self {
        self.start_nudge_mins = start_mins;
        self.end_nudge_mins = end_mins;
        self
    }

    pub fn with_dirs(mut self, work_dir: &'a Path, pass_dir: &'a Path) -> Self {
        self.work_dir = Some(work_dir);
        self.pass_dir = Some(pass_dir);
        self
    }

    pub fn with_io(mut self, inputs: &'a [PathBuf], outputs: &'a [String]) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses a template, rejecting unknown placeholders and stray braces.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let arg = caps.get(2).map(|m| m.as_str());

            Self::push_literal(&mut segments, source, &source[last..whole.start()])?;
            segments.push(Segment::Placeholder(Placeholder::parse(name, arg)?));
            last = whole.end();
        }
        Self::push_literal(&mut segments, source, &source[last..])?;

        let template = Self {
            source: source.to_string(),
            segments,
        };
        if template.has(|p| *p == Placeholder::Inputs) && template.segments.len() != 1 {
            return Err(TemplateError::Syntax {
                template: source.to_string(),
                reason: "{inputs} must be a whole argument".to_string(),
            });
        }
        Ok(template)
    }

    fn push_literal(
        segments: &mut Vec<Segment>,
        source: &str,
        literal: &str,
    ) -> Result<(), TemplateError> {
        if literal.contains(['{', '}']) {
            return Err(TemplateError::Syntax {
                template: source.to_string(),
                reason: format!("unbalanced brace in '{}'", literal),
            });
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal.to_string()));
        }
        Ok(())
    }

    fn has(&self, pred: impl Fn(&Placeholder) -> bool) -> bool {
        self.segments.iter().any(|s| match s {
            Segment::Placeholder(p) => pred(p),
            Segment::Literal(_) => false,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template uses `{input:N}`, `{output:N}` or `{inputs}`.
    pub fn uses_command_placeholders(&self) -> bool {
        self.has(Placeholder::is_command_only)
    }

    /// Stage names referenced through `{artifact:STAGE}`.
    pub fn artifact_refs(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(Placeholder::Artifact(stage)) => Some(stage.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Raw roles referenced through `{raw:ROLE}`.
    pub fn raw_refs(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(Placeholder::Raw(role)) => Some(role.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Renders to a single string.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(p) => out.push_str(&Self::value(p, ctx)?),
            }
        }
        Ok(out)
    }

    /// Renders as command arguments; `{inputs}` expands to one argument per input.
    pub fn render_args(&self, ctx: &TemplateContext<'_>) -> Result<Vec<String>, TemplateError> {
        if let [Segment::Placeholder(Placeholder::Inputs)] = self.segments.as_slice() {
            return Ok(ctx
                .inputs
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect());
        }
        Ok(vec![self.render(ctx)?])
    }

    fn value(p: &Placeholder, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
        let pass = ctx.pass;
        let path = |p: Option<&Path>, name: &str| {
            p.map(|p| p.to_string_lossy().into_owned())
                .ok_or_else(|| TemplateError::missing(name))
        };

        Ok(match p {
            Placeholder::Platform => pass.platform.slug().to_string(),
            Placeholder::PlatformName => pass.platform.platform_name().to_string(),
            Placeholder::Mission => pass.platform.mission().to_string(),
            Placeholder::PassId => pass.id.to_string(),
            Placeholder::Orbit => pass
                .orbit_number
                .map(|o| o.to_string())
                .ok_or_else(|| TemplateError::missing("orbit"))?,
            Placeholder::StartTime(fmt) => pass.start_time.format(fmt).to_string(),
            Placeholder::ProcessedAt(fmt) => ctx.processed_at.format(fmt).to_string(),
            Placeholder::StartNudge => ctx.start_nudge_mins.to_string(),
            Placeholder::EndNudge => ctx.end_nudge_mins.to_string(),
            Placeholder::WorkDir => path(ctx.work_dir, "work_dir")?,
            Placeholder::PassDir => path(ctx.pass_dir, "pass_dir")?,
            Placeholder::Raw(role) => path(
                pass.raw_files.get(role).map(PathBuf::as_path),
                &format!("raw:{}", role),
            )?,
            Placeholder::Artifact(stage) => path(
                pass.artifacts(stage)
                    .and_then(|a| a.first())
                    .map(PathBuf::as_path),
                &format!("artifact:{}", stage),
            )?,
            Placeholder::Env(var) => {
                std::env::var(var).map_err(|_| TemplateError::missing(format!("env:{}", var)))?
            }
            Placeholder::Input(n) => path(
                ctx.inputs.get(*n).map(PathBuf::as_path),
                &format!("input:{}", n),
            )?,
            Placeholder::Output(n) => ctx
                .outputs
                .get(*n)
                .cloned()
                .ok_or_else(|| TemplateError::missing(format!("output:{}", n)))?,
            Placeholder::Inputs => ctx
                .inputs
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use chrono::TimeZone;

    fn pass() -> Pass {
        let start = Utc.with_ymd_and_hms(2024, 12, 21, 1, 1, 0).unwrap();
        let mut pass = fixtures::terra_pass(start);
        pass.orbit_number = Some(12345);
        pass
    }

    #[test]
    fn test_render_pass_fields() {
        let pass = pass();
        let ctx = TemplateContext::new(&pass, pass.start_time);
        let t = Template::parse("{mission}{start_time:%Y%j.%H%M}.L1A_LAC_{orbit}").unwrap();
        assert_eq!(t.render(&ctx).unwrap(), "T2024356.0101.L1A_LAC_12345");

        let t = Template::parse("{platform_name}/{platform}/{pass_id}").unwrap();
        assert_eq!(
            t.render(&ctx).unwrap(),
            "EOS-Terra/terra/terra_202412210101"
        );
    }

    #[test]
    fn test_default_time_format() {
        let pass = pass();
        let ctx = TemplateContext::new(&pass, pass.start_time);
        let t = Template::parse("x_{start_time}").unwrap();
        assert_eq!(t.render(&ctx).unwrap(), "x_20241221010100");
    }

    #[test]
    fn test_raw_and_dirs() {
        let pass = pass();
        let work = PathBuf::from("/work/p/decode");
        let pass_dir = PathBuf::from("/work/p");
        let ctx = TemplateContext::new(&pass, pass.start_time).with_dirs(&work, &pass_dir);

        let t = Template::parse("{work_dir}/out_{raw:modis}").unwrap();
        let rendered = t.render(&ctx).unwrap();
        assert!(rendered.starts_with("/work/p/decode/out_/data/"));

        let t = Template::parse("{raw:gbad}").unwrap();
        assert_eq!(
            t.render(&ctx),
            Err(TemplateError::MissingValue {
                placeholder: "raw:gbad".to_string()
            })
        );
    }

    #[test]
    fn test_inputs_expand_to_separate_args() {
        let pass = pass();
        let inputs = vec![PathBuf::from("/a.hdf"), PathBuf::from("/b.hdf")];
        let outputs = vec!["/out/*.L1B".to_string()];
        let ctx = TemplateContext::new(&pass, pass.start_time).with_io(&inputs, &outputs);

        let t = Template::parse("{inputs}").unwrap();
        assert_eq!(t.render_args(&ctx).unwrap(), vec!["/a.hdf", "/b.hdf"]);

        let t = Template::parse("--geo={input:1}").unwrap();
        assert_eq!(t.render_args(&ctx).unwrap(), vec!["--geo=/b.hdf"]);
        assert!(t.uses_command_placeholders());

        let t = Template::parse("{output:0}").unwrap();
        assert_eq!(t.render(&ctx).unwrap(), "/out/*.L1B");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Template::parse("{bogus}"),
            Err(TemplateError::UnknownPlaceholder { .. })
        ));
        assert!(matches!(
            Template::parse("{raw}"),
            Err(TemplateError::MissingArgument { .. })
        ));
        assert!(matches!(
            Template::parse("abc{platform"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(
            Template::parse("x{inputs}"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(
            Template::parse("{input:first}"),
            Err(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_references() {
        let t = Template::parse("{artifact:decode} {raw:modis} {artifact:geo}").unwrap();
        assert_eq!(t.artifact_refs(), vec!["decode", "geo"]);
        assert_eq!(t.raw_refs(), vec!["modis"]);
    }

    #[test]
    fn test_glob_characters_are_literal() {
        let pass = pass();
        let ctx = TemplateContext::new(&pass, pass.start_time);
        let t = Template::parse("/data/P0420064*{start_time:%y%j}*001.PDS").unwrap();
        assert_eq!(t.render(&ctx).unwrap(), "/data/P0420064*24356*001.PDS");
    }
}
