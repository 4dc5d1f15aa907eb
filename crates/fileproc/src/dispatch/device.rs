use std::env;

use log::debug;
use serde::{Deserialize, Serialize};

/// Environment variable holding the visible accelerator allow-list.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

const NVIDIA_DEVICE_GLOB: &str = "/dev/nvidia[0-9]*";

/// Where tasks run. Accelerator mode only labels tasks; scheduling on the
/// device is up to the transformation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMode {
    #[default]
    #[serde(rename = "cpu")]
    Cpu,
    #[serde(rename = "cuda", alias = "accelerator")]
    Accelerator,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Cpu => "cpu",
            DeviceMode::Accelerator => "cuda",
        }
    }
}

impl std::str::FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceMode::Cpu),
            "cuda" | "gpu" | "accelerator" => Ok(DeviceMode::Accelerator),
            other => Err(format!("unknown device mode '{}'", other)),
        }
    }
}

/// Lists accelerator ids such as `cuda:0`, `cuda:1`.
pub trait DeviceEnumerator: Send + Sync {
    fn devices(&self) -> Vec<String>;
}

fn labels(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("cuda:{}", i)).collect()
}

/// Reads the allow-list from an environment variable. Listed ids are
/// renumbered from zero, as the runtime sees them after masking.
pub struct EnvDeviceList {
    var: String,
}

impl EnvDeviceList {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// Parses a comma separated id list, ignoring blank entries.
    pub fn parse(value: &str) -> Vec<String> {
        let count = value.split(',').filter(|id| !id.trim().is_empty()).count();
        labels(count)
    }
}

impl Default for EnvDeviceList {
    fn default() -> Self {
        Self::new(VISIBLE_DEVICES_ENV)
    }
}

impl DeviceEnumerator for EnvDeviceList {
    fn devices(&self) -> Vec<String> {
        match env::var(&self.var) {
            Ok(value) => Self::parse(&value),
            Err(_) => Vec::new(),
        }
    }
}

/// Counts NVIDIA character devices under /dev.
#[derive(Default)]
pub struct NvidiaDeviceProbe;

impl DeviceEnumerator for NvidiaDeviceProbe {
    fn devices(&self) -> Vec<String> {
        let count = match glob::glob(NVIDIA_DEVICE_GLOB) {
            Ok(paths) => paths
                .filter_map(|p| p.ok())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| n.strip_prefix("nvidia"))
                        .map(|id| id.chars().all(|c| c.is_ascii_digit()))
                        .unwrap_or(false)
                })
                .count(),
            Err(_) => 0,
        };
        debug!("Probed {} NVIDIA devices", count);
        labels(count)
    }
}

/// Environment allow-list first, runtime probe second.
#[derive(Default)]
pub struct DefaultDeviceEnumerator {
    env: EnvDeviceList,
    probe: NvidiaDeviceProbe,
}

impl DeviceEnumerator for DefaultDeviceEnumerator {
    fn devices(&self) -> Vec<String> {
        let listed = self.env.devices();
        if !listed.is_empty() {
            return listed;
        }
        self.probe.devices()
    }
}

/// Fixed device list.
#[derive(Debug, Clone, Default)]
pub struct StaticDevices(pub Vec<String>);

impl StaticDevices {
    pub fn count(count: usize) -> Self {
        Self(labels(count))
    }
}

impl DeviceEnumerator for StaticDevices {
    fn devices(&self) -> Vec<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const TEST_VAR: &str = "FILEPROC_TEST_VISIBLE_DEVICES";

    #[test]
    fn test_parse_skips_blank_entries() {
        assert_eq!(EnvDeviceList::parse("3,5"), vec!["cuda:0", "cuda:1"]);
        assert_eq!(EnvDeviceList::parse("0, ,2,"), vec!["cuda:0", "cuda:1"]);
        assert!(EnvDeviceList::parse("").is_empty());
    }

    #[test]
    #[serial]
    fn test_env_list_reads_variable() {
        env::set_var(TEST_VAR, "4,7,9");
        let devices = EnvDeviceList::new(TEST_VAR).devices();
        env::remove_var(TEST_VAR);

        assert_eq!(devices, vec!["cuda:0", "cuda:1", "cuda:2"]);
    }

    #[test]
    #[serial]
    fn test_env_list_unset_is_empty() {
        env::remove_var(TEST_VAR);
        assert!(EnvDeviceList::new(TEST_VAR).devices().is_empty());
    }

    #[test]
    #[serial]
    fn test_default_enumerator_prefers_env() {
        env::set_var(VISIBLE_DEVICES_ENV, "0,1");
        let devices = DefaultDeviceEnumerator::default().devices();
        env::remove_var(VISIBLE_DEVICES_ENV);

        assert_eq!(devices, vec!["cuda:0", "cuda:1"]);
    }

    #[test]
    fn test_device_mode_from_str() {
        assert_eq!("cpu".parse::<DeviceMode>().unwrap(), DeviceMode::Cpu);
        assert_eq!("CUDA".parse::<DeviceMode>().unwrap(), DeviceMode::Accelerator);
        assert!("tpu".parse::<DeviceMode>().is_err());
    }

    #[test]
    fn test_device_mode_serde_names() {
        let mode: DeviceMode = serde_json::from_str("\"cuda\"").unwrap();
        assert_eq!(mode, DeviceMode::Accelerator);
        assert_eq!(serde_json::to_string(&DeviceMode::Cpu).unwrap(), "\"cpu\"");
    }
}
