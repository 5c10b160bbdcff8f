use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::processor::ProcessorRegistry;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub const ENV_WATCH_DIR: &str = "TABFLOW_WATCH_DIR";
pub const ENV_DATA_DIR: &str = "TABFLOW_DATA_DIR";
pub const ENV_DATABASE: &str = "TABFLOW_DATABASE";
pub const ENV_WORKERS: &str = "TABFLOW_WORKERS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml`/`.yml` files are YAML; everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Loads a config file, applies environment overrides, and validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = parse(&content, ConfigFormat::from_path(path))?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Parses and validates config content without consulting the environment.
pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let config = parse(content, format)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_schema(&json_value)?;

    Ok(serde_json::from_value(json_value)?)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Overrides config values from `TABFLOW_*` environment variables.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(dir) = env_value(ENV_WATCH_DIR) {
        config.watch_directory = PathBuf::from(dir);
    }
    if let Some(dir) = env_value(ENV_DATA_DIR) {
        config.data_directory = PathBuf::from(dir);
    }
    if let Some(db) = env_value(ENV_DATABASE) {
        config.database = Some(PathBuf::from(db));
    }
    if let Some(workers) = env_value(ENV_WORKERS) {
        config.worker_count = workers
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidOverride {
                var: ENV_WORKERS.to_string(),
                value: workers.clone(),
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// Checks the constraints the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }
    if config.queue_capacity == 0 {
        return Err(invalid("queue_capacity must be at least 1"));
    }

    let watch = &config.watch;
    for (name, value) in [
        ("quiet_interval_ms", watch.quiet_interval_ms),
        ("restart_delay_ms", watch.restart_delay_ms),
        ("health_check_interval_ms", watch.health_check_interval_ms),
    ] {
        if value == 0 {
            return Err(invalid(format!("watch.{} must be greater than 0", name)));
        }
    }
    if watch.poll_interval_ms == Some(0) {
        return Err(invalid("watch.poll_interval_ms must be greater than 0"));
    }
    if watch.max_wait_ms < watch.quiet_interval_ms {
        return Err(invalid(format!(
            "watch.max_wait_ms ({}) must not be shorter than watch.quiet_interval_ms ({})",
            watch.max_wait_ms, watch.quiet_interval_ms
        )));
    }
    if watch.extensions.iter().all(|e| e.trim().is_empty()) {
        return Err(invalid("watch.extensions must name at least one extension"));
    }

    for pattern in &watch.ignore_patterns {
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }

    let registry = ProcessorRegistry::from_config(&config.processors)?;
    for job in &config.auto_jobs {
        if !registry.contains(&job.job_type) {
            return Err(ConfigError::UnknownProcessor {
                name: job.job_type.clone(),
                available: registry.job_types().join(", "),
            });
        }
    }

    Ok(())
}
