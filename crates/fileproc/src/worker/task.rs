use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Ordered key/value metadata attached to every item.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A path together with its metadata, the unit that flows between stages.
pub type Item = (PathBuf, Metadata);

/// Failure reasons keyed by path. Only results with an error end up here.
pub type ErrorMap = BTreeMap<PathBuf, String>;

/// Device label used for every task in cpu mode.
pub const CPU_DEVICE: &str = "cpu";

/// One unit of work. The device label is fixed when the task is enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTask {
    pub path: PathBuf,
    pub metadata: Metadata,
    pub device: String,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>, metadata: Metadata, device: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            metadata,
            device: device.into(),
        }
    }

    pub fn is_cpu(&self) -> bool {
        self.device == CPU_DEVICE
    }
}

/// Outcome of one task. `path` may differ from the task path when the
/// transformation materialised its output elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    #[serde(with = "path_bytes")]
    pub path: PathBuf,
    pub metadata: Metadata,
    pub error: Option<String>,
    pub passed: bool,
}

impl WorkResult {
    pub fn new(
        path: impl Into<PathBuf>,
        metadata: Metadata,
        error: Option<String>,
        passed: bool,
    ) -> Self {
        Self {
            path: path.into(),
            metadata,
            error,
            passed,
        }
    }

    /// Accepted result that keeps the task's path and metadata.
    pub fn accept(task: &FileTask) -> Self {
        Self::new(task.path.clone(), task.metadata.clone(), None, true)
    }

    /// Rejected (filtered out) result without an error.
    pub fn reject(task: &FileTask) -> Self {
        Self::new(task.path.clone(), task.metadata.clone(), None, false)
    }

    /// Failed result carrying the failure reason.
    pub fn failure(task: &FileTask, error: impl Into<String>) -> Self {
        Self::new(
            task.path.clone(),
            task.metadata.clone(),
            Some(error.into()),
            false,
        )
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_item(self) -> Item {
        (self.path, self.metadata)
    }
}

/// Paths cross the safety-mode pipe as raw bytes so that names which are
/// not valid UTF-8 survive the trip.
mod path_bytes {
    use std::ffi::OsString;
    use std::os::unix::ffi::{OsStrExt, OsStringExt};
    use std::path::{Path, PathBuf};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(path.as_os_str().as_bytes())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Ok(PathBuf::from(OsString::from_vec(bytes)))
    }
}
