use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::fs;
use std::path::Path;
use thiserror::Error;

// Hard limits of the PutLogEvents API
const MAX_PUT_EVENTS: usize = 10_000;
const MAX_PUT_BYTES: usize = 1_048_576;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(err) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), err),
        )),
        other => other,
    })
}

/// Parse and validate a YAML tuning document
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    // An empty document means "all defaults"
    let mut config: Config = if yaml_string.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&yaml_string)?
    };

    if let Some(socket) = config.container.docker_socket.as_mut() {
        *socket = expand_tilde(socket);
    }

    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = env_var_pattern()
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded_vars.join(", ")
    )))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_shipper(&config.shipper, &mut errors);

    if config.container.max_line_bytes == 0 {
        errors.push("container.max_line_bytes must be greater than 0".to_string());
    }

    if let Some(url) = &config.aws.endpoint_url {
        if url.trim().is_empty() {
            errors.push("aws.endpoint_url cannot be empty when set".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_shipper(shipper: &ShipperConfig, errors: &mut Vec<String>) {
    if shipper.max_batch_lines == 0 || shipper.max_batch_lines > MAX_PUT_EVENTS {
        errors.push(format!(
            "shipper.max_batch_lines must be between 1 and {}, got {}",
            MAX_PUT_EVENTS, shipper.max_batch_lines
        ));
    }

    if shipper.max_batch_bytes <= shipper.line_overhead_bytes
        || shipper.max_batch_bytes > MAX_PUT_BYTES
    {
        errors.push(format!(
            "shipper.max_batch_bytes must be above line_overhead_bytes ({}) and at most {}, got {}",
            shipper.line_overhead_bytes, MAX_PUT_BYTES, shipper.max_batch_bytes
        ));
    }

    if shipper.flush_interval.is_zero() {
        errors.push("shipper.flush_interval must be greater than 0".to_string());
    }

    if shipper.queue_capacity == 0 {
        errors.push("shipper.queue_capacity must be greater than 0".to_string());
    }

    let retry = &shipper.retry;
    if retry.max_attempts == 0 {
        errors.push("shipper.retry.max_attempts must be at least 1".to_string());
    }

    if retry.initial_backoff > retry.max_backoff {
        errors.push(format!(
            "shipper.retry.initial_backoff ({:?}) exceeds max_backoff ({:?})",
            retry.initial_backoff, retry.max_backoff
        ));
    }
}
