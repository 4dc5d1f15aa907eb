//! Transformations used across tests. Task index comes from the file name
//! (`file_<i>.<ext>`).

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fileproc::{FileTask, Transform, TransformError, TransformResult, WorkResult};

pub fn index_of(path: &Path) -> usize {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .and_then(|s| s.parse().ok())
        .unwrap_or(usize::MAX)
}

pub fn accept_all() -> Arc<dyn Transform> {
    Arc::new(|task: &FileTask| -> TransformResult { Ok(WorkResult::accept(task)) })
}

/// Accepts even indices, rejects odd ones.
pub fn accept_even() -> Arc<dyn Transform> {
    Arc::new(|task: &FileTask| -> TransformResult {
        if index_of(&task.path) % 2 == 0 {
            Ok(WorkResult::accept(task))
        } else {
            Ok(WorkResult::reject(task))
        }
    })
}

/// Fails the task with index `bad`, accepts the rest.
pub fn fail_index(bad: usize) -> Arc<dyn Transform> {
    Arc::new(move |task: &FileTask| -> TransformResult {
        if index_of(&task.path) == bad {
            Err(TransformError::new(format!("cannot process task {}", bad)))
        } else {
            Ok(WorkResult::accept(task))
        }
    })
}

/// Panics on index `bad`.
pub fn panic_index(bad: usize) -> Arc<dyn Transform> {
    Arc::new(move |task: &FileTask| -> TransformResult {
        if index_of(&task.path) == bad {
            panic!("transformation crashed on task {}", bad);
        }
        Ok(WorkResult::accept(task))
    })
}

/// Never returns for index `bad`.
pub fn hang_index(bad: usize) -> Arc<dyn Transform> {
    Arc::new(move |task: &FileTask| -> TransformResult {
        if index_of(&task.path) == bad {
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
        Ok(WorkResult::accept(task))
    })
}

/// Records the device label and file content in metadata.
pub fn describe() -> Arc<dyn Transform> {
    Arc::new(|task: &FileTask| -> TransformResult {
        let content = std::fs::read_to_string(&task.path)?;
        let mut meta = task.metadata.clone();
        meta.insert("device".to_string(), task.device.clone().into());
        meta.insert("content".to_string(), content.into());
        meta.insert(
            "file".to_string(),
            task.path.to_string_lossy().into_owned().into(),
        );
        Ok(WorkResult::accept(task).with_metadata(meta))
    })
}
