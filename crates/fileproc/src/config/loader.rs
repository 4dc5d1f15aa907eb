use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::EngineConfig;
use crate::dispatch::DeviceMode;
use crate::error::ConfigError;
use crate::logging::LogFormat;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub const ENV_PREFIX: &str = "FILEPROC_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml`/`.yml` are YAML, everything else is JSON.
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

/// Loads a config file, applies `FILEPROC_*` overrides and validates the
/// result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = parse_config(&content, ConfigFormat::from_path(path))?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    log::info!("Loaded engine config from {}", path.display());
    Ok(config)
}

/// Parses and validates without looking at the environment.
pub fn load_config_from_str(
    content: &str,
    format: ConfigFormat,
) -> Result<EngineConfig, ConfigError> {
    let config = parse_config(content, format)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str, format: ConfigFormat) -> Result<EngineConfig, ConfigError> {
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

/// Checks the rules the schema cannot express.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.safety && config.device == DeviceMode::Accelerator {
        return Err(ConfigError::SafetyRequiresCpu);
    }

    if config.max_workers == Some(0) {
        return Err(ConfigError::Validation {
            message: "max_workers must be at least 1".to_string(),
        });
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("task_secs", timeouts.task_secs),
        ("process_secs", timeouts.process_secs),
        ("result_poll_secs", timeouts.result_poll_secs),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::Validation {
                message: format!("timeouts.{} must be a positive number", name),
            });
        }
    }
    for (name, value) in [
        ("shutdown_grace_secs", timeouts.shutdown_grace_secs),
        ("result_grace_secs", timeouts.result_grace_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation {
                message: format!("timeouts.{} must not be negative", name),
            });
        }
    }

    config.logging.validate()
}

fn env_value(name: &str) -> Option<(String, String)> {
    let key = format!("{}{}", ENV_PREFIX, name);
    env::var(&key).ok().map(|value| (key, value))
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Applies `FILEPROC_MAX_WORKERS`, `FILEPROC_DEVICE`, `FILEPROC_SAFETY`,
/// `FILEPROC_SILENCE_CHILDREN`, `FILEPROC_TASK_TIMEOUT`,
/// `FILEPROC_PROCESS_TIMEOUT`, `FILEPROC_LOG_LEVEL` and `FILEPROC_LOG_FORMAT`.
pub fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigError> {
    if let Some((key, value)) = env_value("MAX_WORKERS") {
        config.max_workers = Some(parse_env(&key, &value)?);
    }
    if let Some((key, value)) = env_value("DEVICE") {
        config.device = DeviceMode::from_str(&value).map_err(|_| ConfigError::InvalidEnv {
            name: key,
            value,
        })?;
    }
    if let Some((key, value)) = env_value("SAFETY") {
        config.safety = parse_bool(&key, &value)?;
    }
    if let Some((key, value)) = env_value("SILENCE_CHILDREN") {
        config.silence_children = parse_bool(&key, &value)?;
    }
    if let Some((key, value)) = env_value("TASK_TIMEOUT") {
        config.timeouts.task_secs = parse_env(&key, &value)?;
    }
    if let Some((key, value)) = env_value("PROCESS_TIMEOUT") {
        config.timeouts.process_secs = parse_env(&key, &value)?;
    }
    if let Some((_, value)) = env_value("LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Some((key, value)) = env_value("LOG_FORMAT") {
        config.logging.format = LogFormat::from_str(&value).map_err(|_| {
            ConfigError::InvalidEnv {
                name: key,
                value,
            }
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_KEYS: [&str; 8] = [
        "FILEPROC_MAX_WORKERS",
        "FILEPROC_DEVICE",
        "FILEPROC_SAFETY",
        "FILEPROC_SILENCE_CHILDREN",
        "FILEPROC_TASK_TIMEOUT",
        "FILEPROC_PROCESS_TIMEOUT",
        "FILEPROC_LOG_LEVEL",
        "FILEPROC_LOG_FORMAT",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
        env::remove_var("RUST_LOG");
    }

    fn write_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_json_config() {
        let config = load_config_from_str("{}", ConfigFormat::Json).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_full_yaml_config() {
        let yaml = r#"
version: "1.0"
max_workers: 4
device: cuda
silence_children: true
timeouts:
  task_secs: 10
  process_secs: 2.5
logging:
  level: debug
  format: json
"#;
        let config = load_config_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.max_workers, Some(4));
        assert_eq!(config.device, DeviceMode::Accelerator);
        assert!(config.silence_children);
        assert_eq!(config.timeouts.process_secs, 2.5);
        assert_eq!(config.timeouts.result_poll_secs, 30.0);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_schema_rejects_unknown_keys_and_bad_values() {
        let err = load_config_from_str(r#"{"workers": 2}"#, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));

        let err = load_config_from_str(r#"{"max_workers": 0}"#, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));

        let err =
            load_config_from_str(r#"{"device": "tpu"}"#, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_safety_with_cuda_rejected() {
        let err = load_config_from_str(r#"{"safety": true, "device": "cuda"}"#, ConfigFormat::Json)
            .unwrap_err();
        assert!(matches!(err, ConfigError::SafetyRequiresCpu));
        assert_eq!(err.to_string(), "Safety mode work only on cpu");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("config")), ConfigFormat::Json);
    }

    #[test]
    #[serial]
    fn test_load_file_with_env_overrides() {
        clear_env();
        let file = write_config(".json", r#"{"max_workers": 8, "safety": false}"#);

        env::set_var("FILEPROC_MAX_WORKERS", "2");
        env::set_var("FILEPROC_SAFETY", "yes");
        env::set_var("FILEPROC_PROCESS_TIMEOUT", "0.5");
        let config = load_config(file.path());
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.max_workers, Some(2));
        assert!(config.safety);
        assert_eq!(config.timeouts.process_secs, 0.5);
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        clear_env();
        let file = write_config(".yaml", "safety: false\n");

        env::set_var("FILEPROC_SAFETY", "maybe");
        let err = load_config(file.path()).unwrap_err();
        clear_env();

        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    #[serial]
    fn test_env_override_can_create_conflict() {
        clear_env();
        let file = write_config(".json", r#"{"safety": true}"#);

        env::set_var("FILEPROC_DEVICE", "cuda");
        let err = load_config(file.path()).unwrap_err();
        clear_env();

        assert!(matches!(err, ConfigError::SafetyRequiresCpu));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/fileproc.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
