use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::dispatch::{DefaultDeviceEnumerator, DeviceEnumerator, DeviceMode, Dispatcher};
use crate::error::{ConfigError, Result, SourceError};
use crate::source::TaskSource;
use crate::worker::pool::{ExecutionMode, ShutdownReport, WorkerPool, WorkerSettings};
use crate::worker::task::Item;
use crate::worker::transform::Transform;

use super::aggregator::ResultAggregator;
use super::context::{StageInput, StageResult};
use super::progress::{BarProgress, NoopSink, ProgressReporter, SharedSink};

/// Every wait in a run is bounded by one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long an idle worker waits for a task before exiting.
    pub task: Duration,
    /// Join deadline for a forked child, applied again after SIGTERM.
    pub process: Duration,
    /// Result-queue poll interval between worker liveness checks.
    pub result_poll: Duration,
    /// Grace period for workers when the pool shuts down.
    pub shutdown_grace: Duration,
    /// How long to wait for a result line from a child that already exited.
    pub result_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            task: Duration::from_secs(300),
            process: Duration::from_secs(50),
            result_poll: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            result_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub description: String,
    pub max_workers: Option<usize>,
    pub source: Option<TaskSource>,
    pub overrides: Option<Vec<Item>>,
    pub safety: bool,
    pub device: DeviceMode,
    pub timeouts: Timeouts,
    pub silence_children: bool,
}

impl ProcessOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            max_workers: None,
            source: None,
            overrides: None,
            safety: false,
            device: DeviceMode::Cpu,
            timeouts: Timeouts::default(),
            silence_children: false,
        }
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn source(mut self, source: TaskSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn overrides(mut self, items: Vec<Item>) -> Self {
        self.overrides = Some(items);
        self
    }

    pub fn safety(mut self, safety: bool) -> Self {
        self.safety = safety;
        self
    }

    pub fn device(mut self, device: DeviceMode) -> Self {
        self.device = device;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn silence_children(mut self, silence: bool) -> Self {
        self.silence_children = silence;
        self
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.safety {
            ExecutionMode::Isolated
        } else {
            ExecutionMode::Direct
        }
    }

    /// Rejects option combinations before any work starts.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.safety && self.device == DeviceMode::Accelerator {
            return Err(ConfigError::SafetyRequiresCpu);
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::Validation {
                message: "max_workers must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

pub type PostProcessFn = Box<dyn Fn(StageResult) -> StageResult + Send + Sync>;

/// Everything a run produced, including the bookkeeping behind the triple.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub result: StageResult,
    pub total: usize,
    pub received: usize,
    pub worker_count: usize,
    pub shutdown: ShutdownReport,
}

impl ProcessReport {
    pub fn missing(&self) -> usize {
        self.total.saturating_sub(self.received)
    }
}

/// Runs one transformation over a set of items on a worker pool.
pub struct Processor {
    options: ProcessOptions,
    devices: Arc<dyn DeviceEnumerator>,
    sink: SharedSink,
    progress: Arc<dyn ProgressReporter>,
    postprocess: Option<PostProcessFn>,
}

impl Processor {
    pub fn new(options: ProcessOptions) -> Self {
        Self {
            options,
            devices: Arc::new(DefaultDeviceEnumerator::default()),
            sink: Arc::new(NoopSink),
            progress: Arc::new(BarProgress::new()),
            postprocess: None,
        }
    }

    pub fn with_devices(mut self, devices: Arc<dyn DeviceEnumerator>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Rewrites the collected triple before it is returned.
    pub fn with_postprocess<F>(mut self, postprocess: F) -> Self
    where
        F: Fn(StageResult) -> StageResult + Send + Sync + 'static,
    {
        self.postprocess = Some(Box::new(postprocess));
        self
    }

    pub fn options(&self) -> &ProcessOptions {
        &self.options
    }

    pub fn run(&self, input: StageInput, transform: Arc<dyn Transform>) -> Result<StageResult> {
        self.run_detailed(input, transform).map(|report| report.result)
    }

    pub fn run_detailed(
        &self,
        input: StageInput,
        transform: Arc<dyn Transform>,
    ) -> Result<ProcessReport> {
        let run_id = Uuid::new_v4();
        let _span = info_span!("process",
            run_id = %run_id,
            description = %self.options.description,
        )
        .entered();

        self.options.validate()?;

        let StageInput {
            all_items,
            filtered_items,
            errors,
        } = input;
        let items = self.select_items(all_items, filtered_items)?;

        let dispatcher = Dispatcher::new(self.options.device, self.devices.as_ref())?;
        let total = items.len();
        let worker_count = dispatcher.worker_count(self.options.max_workers, total);
        let queue = dispatcher.enqueue(items);

        let timeouts = self.options.timeouts;
        let settings = WorkerSettings {
            mode: self.options.execution_mode(),
            task_timeout: timeouts.task,
            process_timeout: timeouts.process,
            result_grace: timeouts.result_grace,
            silence_children: self.options.silence_children,
            sink: Arc::clone(&self.sink),
        };
        let pool = WorkerPool::start(&queue, worker_count, transform, settings)?;

        let aggregator = ResultAggregator::new(timeouts.result_poll, Arc::clone(&self.progress));
        let drained = aggregator.drain(&pool, total, &self.options.description, errors);
        let shutdown = pool.shutdown(timeouts.shutdown_grace);

        if drained.missing() > 0 {
            warn!(
                missing = drained.missing(),
                total, "results lost to dead workers"
            );
        }

        let received = drained.received;
        let result = match &self.postprocess {
            Some(postprocess) => postprocess(drained.result),
            None => drained.result,
        };

        info!(
            total,
            received,
            passed = result.filtered_items.len(),
            errors = result.errors.len(),
            "{} finished",
            self.options.description
        );

        Ok(ProcessReport {
            result,
            total,
            received,
            worker_count,
            shutdown,
        })
    }

    /// Non-empty overrides win; otherwise the accepted items of the previous
    /// stage; otherwise the task source.
    fn select_items(
        &self,
        all_items: Option<Vec<Item>>,
        filtered_items: Option<Vec<Item>>,
    ) -> std::result::Result<Vec<Item>, SourceError> {
        if let Some(overrides) = self.options.overrides.as_ref().filter(|o| !o.is_empty()) {
            return Ok(overrides.clone());
        }

        match (all_items, filtered_items) {
            (_, Some(filtered)) => Ok(filtered),
            (None, None) => match &self.options.source {
                Some(source) => source.resolve(),
                None => Err(SourceError::NoMatchingItems),
            },
            (Some(_), None) => Err(SourceError::NoMatchingItems),
        }
    }
}

/// One-shot form of [`Processor::run`] with default collaborators.
pub fn process(
    input: StageInput,
    transform: Arc<dyn Transform>,
    options: ProcessOptions,
) -> Result<StageResult> {
    Processor::new(options).run(input, transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::StaticDevices;
    use crate::error::{DispatchError, FileprocError};
    use crate::pipeline::progress::NoopProgress;
    use crate::worker::task::{FileTask, Metadata, WorkResult};
    use crate::worker::transform::TransformResult;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn items(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| (PathBuf::from(format!("item_{}", i)), Metadata::new()))
            .collect()
    }

    fn accept_all() -> Arc<dyn Transform> {
        Arc::new(|task: &FileTask| -> TransformResult { Ok(WorkResult::accept(task)) })
    }

    fn quiet(options: ProcessOptions) -> Processor {
        Processor::new(options).with_progress(Arc::new(NoopProgress))
    }

    #[test]
    fn test_safety_with_accelerator_is_rejected() {
        let options = ProcessOptions::new("x")
            .safety(true)
            .device(DeviceMode::Accelerator);
        let err = quiet(options)
            .run(StageInput::from_items(items(1)), accept_all())
            .unwrap_err();
        assert!(matches!(
            err,
            FileprocError::Config(ConfigError::SafetyRequiresCpu)
        ));
    }

    #[test]
    fn test_missing_items_and_source_is_rejected() {
        let err = quiet(ProcessOptions::new("x"))
            .run(StageInput::empty(), accept_all())
            .unwrap_err();
        assert!(matches!(
            err,
            FileprocError::Source(SourceError::NoMatchingItems)
        ));
    }

    #[test]
    fn test_no_accelerators_fails_before_work() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let transform: Arc<dyn Transform> = Arc::new(move |task: &FileTask| -> TransformResult {
            *counter.lock().unwrap() += 1;
            Ok(WorkResult::accept(task))
        });

        let err = quiet(ProcessOptions::new("x").device(DeviceMode::Accelerator))
            .with_devices(Arc::new(StaticDevices::default()))
            .run(StageInput::from_items(items(3)), transform)
            .unwrap_err();

        assert!(matches!(
            err,
            FileprocError::Dispatch(DispatchError::NoAcceleratorDevices)
        ));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_overrides_replace_input() {
        let report = quiet(ProcessOptions::new("x").overrides(items(2)))
            .run_detailed(StageInput::from_items(items(5)), accept_all())
            .unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.result.all_items.len(), 2);
    }

    #[test]
    fn test_empty_overrides_are_ignored() {
        let report = quiet(ProcessOptions::new("x").overrides(Vec::new()))
            .run_detailed(StageInput::from_items(items(4)), accept_all())
            .unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.result.all_items.len(), 4);
    }

    #[test]
    fn test_devices_are_passed_to_transform() {
        let transform: Arc<dyn Transform> = Arc::new(|task: &FileTask| -> TransformResult {
            let mut meta = task.metadata.clone();
            meta.insert("device".to_string(), task.device.clone().into());
            Ok(WorkResult::accept(task).with_metadata(meta))
        });

        let result = quiet(
            ProcessOptions::new("gpu")
                .device(DeviceMode::Accelerator)
                .max_workers(2),
        )
        .with_devices(Arc::new(StaticDevices::count(2)))
        .run(StageInput::from_items(items(6)), transform)
        .unwrap();

        for (path, meta) in &result.all_items {
            let index: usize = path
                .to_str()
                .unwrap()
                .trim_start_matches("item_")
                .parse()
                .unwrap();
            assert_eq!(meta["device"], format!("cuda:{}", index % 2));
        }
    }

    #[test]
    fn test_postprocess_rewrites_result() {
        let result = quiet(ProcessOptions::new("x"))
            .with_postprocess(|mut result: StageResult| {
                result.filtered_items.clear();
                result
            })
            .run(StageInput::from_items(items(3)), accept_all())
            .unwrap();

        assert_eq!(result.all_items.len(), 3);
        assert!(result.filtered_items.is_empty());
    }

    #[test]
    fn test_empty_item_list_returns_empty_triple() {
        let report = quiet(ProcessOptions::new("x"))
            .run_detailed(StageInput::from_items(Vec::new()), accept_all())
            .unwrap();
        assert_eq!(report.worker_count, 0);
        assert!(report.result.all_items.is_empty());
        assert_eq!(report.missing(), 0);
    }

    #[test]
    fn test_zero_max_workers_is_rejected() {
        let err = quiet(ProcessOptions::new("x").max_workers(0))
            .run(StageInput::from_items(items(1)), accept_all())
            .unwrap_err();
        assert!(matches!(err, FileprocError::Config(ConfigError::Validation { .. })));
    }
}
