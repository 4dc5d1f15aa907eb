use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Validation {
                message: format!("Unknown log format '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Checks that `level` parses as a filter directive list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.configured_filter().map(|_| ())
    }

    /// `RUST_LOG` wins over the configured level.
    pub fn filter(&self) -> Result<EnvFilter, ConfigError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => self.configured_filter(),
        }
    }

    fn configured_filter(&self) -> Result<EnvFilter, ConfigError> {
        EnvFilter::try_new(&self.level).map_err(|e| ConfigError::Validation {
            message: format!("Invalid log level '{}': {}", self.level, e),
        })
    }
}

/// Installs the global subscriber and bridges `log` records into it.
///
/// Fails if a subscriber or logger was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = config.filter()?;

    tracing_log::LogTracer::init().map_err(|e| ConfigError::Validation {
        message: format!("Failed to install log bridge: {}", e),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    installed.map_err(|e| ConfigError::Validation {
        message: format!("Failed to install tracing subscriber: {}", e),
    })
}
