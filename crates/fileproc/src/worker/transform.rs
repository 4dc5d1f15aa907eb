use thiserror::Error;

use super::task::{FileTask, WorkResult};

/// Error raised by a user transformation. Recorded as the failure reason of
/// the task's `WorkResult`; it never stops the pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransformError {
    message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for TransformError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TransformError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for TransformError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

pub type TransformResult = Result<WorkResult, TransformError>;

/// The per-item transformation supplied by the caller.
///
/// Implementations must not rely on state shared with the orchestrator: in
/// safety mode every call runs in a freshly forked child process and only the
/// returned `WorkResult` makes it back.
pub trait Transform: Send + Sync {
    fn apply(&self, task: &FileTask) -> TransformResult;
}

impl<F> Transform for F
where
    F: Fn(&FileTask) -> TransformResult + Send + Sync,
{
    fn apply(&self, task: &FileTask) -> TransformResult {
        self(task)
    }
}

/// Runs a transformation and folds a returned error into a failed result.
pub(crate) fn apply_or_fail(transform: &dyn Transform, task: &FileTask) -> WorkResult {
    match transform.apply(task) {
        Ok(result) => result,
        Err(e) => WorkResult::failure(task, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::task::{Metadata, CPU_DEVICE};

    #[test]
    fn test_closure_is_transform() {
        let transform = |task: &FileTask| -> TransformResult { Ok(WorkResult::accept(task)) };
        let task = FileTask::new("a.txt", Metadata::new(), CPU_DEVICE);
        let result = transform.apply(&task).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn test_apply_or_fail_records_error() {
        let transform =
            |_: &FileTask| -> TransformResult { Err(TransformError::new("cannot parse")) };
        let task = FileTask::new("a.txt", Metadata::new(), CPU_DEVICE);

        let result = apply_or_fail(&transform, &task);
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("cannot parse"));
        assert_eq!(result.path, task.path);
    }

    #[test]
    fn test_transform_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: TransformError = io.into();
        assert_eq!(err.message(), "missing file");
    }

    #[test]
    fn test_transform_error_display_and_source() {
        let err: TransformError = "bad header".into();
        assert_eq!(err.to_string(), "bad header");

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }
}
