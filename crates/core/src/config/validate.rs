use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::locator::Template;
use crate::pass::Platform;
use crate::pipeline::PipelineSpec;

/// Validate configuration.
///
/// Besides the scalar limits this checks every pipeline: raw input patterns
/// compile, stage names are unique, templates parse and only reference raw
/// roles that exist and stages that run earlier.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let orch = &config.orchestrator;
    if orch.max_concurrent_stages == 0 {
        return Err(invalid("orchestrator.max_concurrent_stages must be at least 1"));
    }
    if orch.tick_interval_ms == 0 {
        return Err(invalid("orchestrator.tick_interval_ms cannot be 0"));
    }
    if orch.report_channel_capacity == 0 {
        return Err(invalid("orchestrator.report_channel_capacity cannot be 0"));
    }
    let mult = orch.retry.backoff_multiplier;
    if !mult.is_finite() || mult < 1.0 {
        return Err(invalid(
            "orchestrator.retry.backoff_multiplier must be a finite number >= 1",
        ));
    }
    if orch.retry.max_delay_secs < orch.retry.initial_delay_secs {
        return Err(invalid(
            "orchestrator.retry.max_delay_secs cannot be lower than initial_delay_secs",
        ));
    }

    if config.listener.channel_capacity == 0 {
        return Err(invalid("listener.channel_capacity cannot be 0"));
    }
    if config.publisher.channel_capacity == 0 {
        return Err(invalid("publisher.channel_capacity cannot be 0"));
    }
    config
        .publisher
        .check_topic()
        .map_err(|e| invalid(format!("publisher.topic: {}", e)))?;
    if config.tracker.staleness_horizon_secs == 0 {
        return Err(invalid("tracker.staleness_horizon_secs cannot be 0"));
    }

    if config.pipelines.iter().next().is_none() {
        return Err(invalid("at least one pipeline must be configured"));
    }
    for (platform, spec) in config.pipelines.iter() {
        validate_pipeline(platform, spec)?;
    }

    Ok(())
}

fn validate_pipeline(platform: Platform, spec: &PipelineSpec) -> Result<(), ConfigError> {
    let prefix = format!("pipelines.{}", platform);

    if spec.raw_inputs.is_empty() {
        return Err(invalid(format!("{}: raw_inputs cannot be empty", prefix)));
    }
    let mut roles = HashSet::new();
    for input in &spec.raw_inputs {
        if !roles.insert(input.role.as_str()) {
            return Err(invalid(format!(
                "{}: duplicate raw input role '{}'",
                prefix, input.role
            )));
        }
        glob::Pattern::new(&input.pattern).map_err(|e| {
            invalid(format!(
                "{}: invalid pattern '{}' for role '{}': {}",
                prefix, input.pattern, input.role, e
            ))
        })?;
    }

    if spec.stages.is_empty() {
        return Err(invalid(format!("{}: stages cannot be empty", prefix)));
    }

    let mut earlier: HashSet<&str> = HashSet::new();
    for stage in &spec.stages {
        let at = format!("{}.{}", prefix, stage.name);

        if stage.name.is_empty() {
            return Err(invalid(format!("{}: stage name cannot be empty", prefix)));
        }
        if earlier.contains(stage.name.as_str()) {
            return Err(invalid(format!(
                "{}: duplicate stage name '{}'",
                prefix, stage.name
            )));
        }
        if stage.command.is_empty() {
            return Err(invalid(format!("{}: command cannot be empty", at)));
        }
        if stage.retry_limit == 0 {
            return Err(invalid(format!("{}: retry_limit must be at least 1", at)));
        }
        if stage.timeout_secs == 0 {
            return Err(invalid(format!("{}: timeout_secs cannot be 0", at)));
        }
        if stage.outputs.is_empty() {
            return Err(invalid(format!("{}: outputs cannot be empty", at)));
        }
        if stage.success_exit_codes.is_empty() {
            return Err(invalid(format!("{}: success_exit_codes cannot be empty", at)));
        }

        let command = stage.command.iter().map(|t| (t, true));
        let paths = stage
            .inputs
            .iter()
            .chain(stage.outputs.iter())
            .chain(stage.env.values())
            .map(|t| (t, false));

        for (source, in_command) in command.chain(paths) {
            let template = Template::parse(source)
                .map_err(|e| invalid(format!("{}: {}", at, e)))?;

            if !in_command && template.uses_command_placeholders() {
                return Err(invalid(format!(
                    "{}: '{}' uses a placeholder only allowed in commands",
                    at, source
                )));
            }
            for role in template.raw_refs() {
                if !roles.contains(role) {
                    return Err(invalid(format!(
                        "{}: '{}' references unknown raw role '{}'",
                        at, source, role
                    )));
                }
            }
            for dep in template.artifact_refs() {
                if !earlier.contains(dep) {
                    return Err(invalid(format!(
                        "{}: '{}' references stage '{}' which does not run earlier",
                        at, source, dep
                    )));
                }
            }
        }

        earlier.insert(stage.name.as_str());
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::pipeline::{RawInput, StageSpec};
    use crate::testing::fixtures;

    fn valid_config() -> Config {
        Config {
            pipelines: fixtures::pipelines(),
            ..Default::default()
        }
    }

    fn terra_mut(config: &mut Config) -> &mut PipelineSpec {
        config.pipelines.terra.as_mut().unwrap()
    }

    fn assert_invalid(config: &Config, needle: &str) {
        match validate_config(config) {
            Err(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains(needle), "'{}' does not mention '{}'", msg, needle)
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse().unwrap(),
                port: 0,
            },
            ..valid_config()
        };
        assert_invalid(&config, "server.port");
    }

    #[test]
    fn test_validate_requires_a_pipeline() {
        assert_invalid(&Config::default(), "at least one pipeline");
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = valid_config();
        config.orchestrator.max_concurrent_stages = 0;
        assert_invalid(&config, "max_concurrent_stages");
    }

    #[test]
    fn test_validate_backoff_multiplier() {
        let mut config = valid_config();
        config.orchestrator.retry.backoff_multiplier = 0.5;
        assert_invalid(&config, "backoff_multiplier");

        config.orchestrator.retry.backoff_multiplier = f64::NAN;
        assert_invalid(&config, "backoff_multiplier");
    }

    #[test]
    fn test_validate_duplicate_stage() {
        let mut config = valid_config();
        let terra = terra_mut(&mut config);
        let dup = terra.stages[0].clone();
        terra.stages.push(dup);
        assert_invalid(&config, "duplicate stage name 'decode'");
    }

    #[test]
    fn test_validate_duplicate_role() {
        let mut config = valid_config();
        terra_mut(&mut config)
            .raw_inputs
            .push(RawInput::new("modis", "*.PDS"));
        assert_invalid(&config, "duplicate raw input role");
    }

    #[test]
    fn test_validate_bad_glob() {
        let mut config = valid_config();
        terra_mut(&mut config).raw_inputs[0].pattern = "P042[.PDS".to_string();
        assert_invalid(&config, "invalid pattern");
    }

    #[test]
    fn test_validate_forward_artifact_reference() {
        let mut config = valid_config();
        terra_mut(&mut config).stages[0]
            .inputs
            .push("{artifact:calibrate}".to_string());
        assert_invalid(&config, "does not run earlier");
    }

    #[test]
    fn test_validate_unknown_role() {
        let mut config = valid_config();
        terra_mut(&mut config).stages[0].inputs = vec!["{raw:gbad}".to_string()];
        assert_invalid(&config, "unknown raw role 'gbad'");
    }

    #[test]
    fn test_validate_command_placeholder_in_output() {
        let mut config = valid_config();
        terra_mut(&mut config).stages[0].outputs = vec!["{output:0}.bak".to_string()];
        assert_invalid(&config, "only allowed in commands");
    }

    #[test]
    fn test_validate_unknown_placeholder() {
        let mut config = valid_config();
        terra_mut(&mut config).stages[0]
            .command
            .push("--sat={satellite}".to_string());
        assert_invalid(&config, "satellite");
    }

    #[test]
    fn test_validate_stage_limits() {
        let mut config = valid_config();
        terra_mut(&mut config).stages[1].retry_limit = 0;
        assert_invalid(&config, "retry_limit");

        let mut config = valid_config();
        terra_mut(&mut config).stages[1].timeout_secs = 0;
        assert_invalid(&config, "timeout_secs");

        let mut config = valid_config();
        terra_mut(&mut config).stages[1].command.clear();
        assert_invalid(&config, "command cannot be empty");

        let mut config = valid_config();
        terra_mut(&mut config).stages[0].outputs.clear();
        assert_invalid(&config, "outputs cannot be empty");
    }

    #[test]
    fn test_validate_publisher_topic() {
        let mut config = valid_config();
        config.publisher.topic = "/{format}/{stasion}/polar".to_string();
        assert_invalid(&config, "unknown placeholder '{stasion}'");
    }

    #[test]
    fn test_validate_empty_stages() {
        let mut config = valid_config();
        terra_mut(&mut config).stages = Vec::<StageSpec>::new();
        assert_invalid(&config, "stages cannot be empty");
    }
}
