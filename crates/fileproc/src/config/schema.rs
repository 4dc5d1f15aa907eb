use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::DeviceMode;
use crate::logging::LoggingConfig;
use crate::pipeline::{ProcessOptions, Timeouts};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: String,
    /// Defaults to the core count.
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub device: DeviceMode,
    #[serde(default)]
    pub safety: bool,
    #[serde(default)]
    pub silence_children: bool,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            max_workers: None,
            device: DeviceMode::Cpu,
            safety: false,
            silence_children: false,
            timeouts: TimeoutsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Options for one processing run described by `description`.
    pub fn process_options(&self, description: impl Into<String>) -> ProcessOptions {
        let mut options = ProcessOptions::new(description)
            .device(self.device)
            .safety(self.safety)
            .silence_children(self.silence_children)
            .timeouts(self.timeouts.to_timeouts());
        options.max_workers = self.max_workers;
        options
    }
}

/// Timeouts in (fractional) seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_task_secs")]
    pub task_secs: f64,
    #[serde(default = "default_process_secs")]
    pub process_secs: f64,
    #[serde(default = "default_result_poll_secs")]
    pub result_poll_secs: f64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: f64,
    #[serde(default = "default_result_grace_secs")]
    pub result_grace_secs: f64,
}

fn default_task_secs() -> f64 {
    300.0
}

fn default_process_secs() -> f64 {
    50.0
}

fn default_result_poll_secs() -> f64 {
    30.0
}

fn default_shutdown_grace_secs() -> f64 {
    5.0
}

fn default_result_grace_secs() -> f64 {
    1.0
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            task_secs: default_task_secs(),
            process_secs: default_process_secs(),
            result_poll_secs: default_result_poll_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            result_grace_secs: default_result_grace_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            task: secs(self.task_secs),
            process: secs(self.process_secs),
            result_poll: secs(self.result_poll_secs),
            shutdown_grace: secs(self.shutdown_grace_secs),
            result_grace: secs(self.result_grace_secs),
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
