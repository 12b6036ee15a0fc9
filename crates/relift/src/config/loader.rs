use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.invoke.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "invoke.max_attempts must be at least 1".to_string(),
        });
    }

    if config.invoke.initial_backoff_ms > config.invoke.max_backoff_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "invoke.initial_backoff_ms ({}) exceeds invoke.max_backoff_ms ({})",
                config.invoke.initial_backoff_ms, config.invoke.max_backoff_ms
            ),
        });
    }

    // An api_key without an endpoint is a misconfiguration, not a degrade.
    if config.providers.publishing.api_key.is_some()
        && config.providers.publishing.endpoint.is_none()
    {
        return Err(ConfigError::Validation {
            message: "providers.publishing.api_key set without an endpoint".to_string(),
        });
    }

    Ok(())
}
