use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::pipeline::progress::SharedSink;

use super::isolate::SafetyShim;
use super::queue::TaskQueue;
use super::task::{FileTask, WorkResult};
use super::transform::{apply_or_fail, Transform};

/// How a worker runs the transformation for each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Call the transformation on the worker thread.
    Direct,
    /// Fork a child process per task (safety mode).
    Isolated,
}

#[derive(Clone)]
pub struct WorkerSettings {
    pub mode: ExecutionMode,
    pub task_timeout: Duration,
    pub process_timeout: Duration,
    pub result_grace: Duration,
    pub silence_children: bool,
    pub sink: SharedSink,
}

/// What happened to the workers when the pool was shut down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    pub panicked: usize,
    pub stragglers: usize,
}

pub struct WorkerPool {
    result_receiver: Receiver<WorkResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers pulling from `queue`.
    pub fn start(
        queue: &TaskQueue,
        worker_count: usize,
        transform: Arc<dyn Transform>,
        settings: WorkerSettings,
    ) -> Result<Self, WorkerError> {
        if settings.mode == ExecutionMode::Isolated && !cfg!(unix) {
            return Err(WorkerError::Unsupported(
                "safety mode requires fork()".to_string(),
            ));
        }

        let (result_sender, result_receiver) = bounded::<WorkResult>(worker_count.max(1) * 2);
        let shutdown = Arc::new(AtomicBool::new(false));
        let executor = Executor::new(transform, &settings, Arc::clone(&shutdown));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task_rx = queue.receiver();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_executor = executor.clone();
            let task_timeout = settings.task_timeout;
            let sink = Arc::clone(&settings.sink);

            let handle = thread::Builder::new()
                .name(format!("fileproc-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        task_rx,
                        result_tx,
                        shutdown_flag,
                        worker_executor,
                        task_timeout,
                        sink,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!(
            "Started {} {:?} workers for {} tasks",
            worker_count,
            settings.mode,
            queue.total()
        );

        Ok(Self {
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<WorkResult, RecvTimeoutError> {
        self.result_receiver.recv_timeout(timeout)
    }

    pub fn try_recv_result(&self) -> Option<WorkResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn alive_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }

    pub fn all_finished(&self) -> bool {
        self.alive_count() == 0
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stops the pool: raises the stop flag (isolated children in flight are
    /// killed), joins workers that finish within `grace` and detaches the
    /// rest. A thread stuck in a direct-mode transformation cannot be killed.
    pub fn shutdown(self, grace: Duration) -> ShutdownReport {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);

        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for (i, worker) in self.workers.into_iter().enumerate() {
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }

            if !worker.is_finished() {
                warn!("Worker {} still running after {:?}, detaching", i, grace);
                report.stragglers += 1;
                continue;
            }

            match worker.join() {
                Ok(()) => {
                    debug!("Worker {} finished", i);
                    report.joined += 1;
                }
                Err(e) => {
                    error!("Worker {} panicked: {}", i, panic_message(e.as_ref()));
                    report.panicked += 1;
                }
            }
        }

        info!(
            "Worker pool stopped ({} joined, {} panicked, {} detached)",
            report.joined, report.panicked, report.stragglers
        );
        report
    }
}

#[derive(Clone)]
enum Executor {
    Direct(Arc<dyn Transform>),
    Isolated(SafetyShim),
}

impl Executor {
    fn new(transform: Arc<dyn Transform>, settings: &WorkerSettings, stop: Arc<AtomicBool>) -> Self {
        match settings.mode {
            ExecutionMode::Direct => Executor::Direct(transform),
            ExecutionMode::Isolated => Executor::Isolated(
                SafetyShim::new(
                    transform,
                    settings.process_timeout,
                    settings.result_grace,
                    Arc::clone(&settings.sink),
                )
                .with_silenced_child(settings.silence_children)
                .with_stop_flag(stop),
            ),
        }
    }

    fn execute(&self, worker_id: usize, task: &FileTask, sink: &SharedSink) -> WorkResult {
        match self {
            Executor::Isolated(shim) => shim.run(task),
            Executor::Direct(transform) => {
                match panic::catch_unwind(AssertUnwindSafe(|| apply_or_fail(transform.as_ref(), task))) {
                    Ok(result) => result,
                    Err(payload) => {
                        // Worker-fatal: the task is dropped without a result.
                        let message = format!(
                            "Worker {} failed: {}, {}",
                            worker_id,
                            panic_message(payload.as_ref()),
                            task.path.display()
                        );
                        error!("{}", message);
                        sink.emit(&message);
                        panic::resume_unwind(payload)
                    }
                }
            }
        }
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<FileTask>,
    result_sender: Sender<WorkResult>,
    shutdown: Arc<AtomicBool>,
    executor: Executor,
    task_timeout: Duration,
    sink: SharedSink,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(task_timeout) {
            Ok(task) => {
                debug!(
                    "Worker {} processing {} on {}",
                    worker_id,
                    task.path.display(),
                    task.device
                );

                let result = executor.execute(worker_id, &task, &sink);

                if let Err(e) = result_sender.send(result) {
                    let message = format!(
                        "Worker {} failed: {}, {}",
                        worker_id,
                        e,
                        task.path.display()
                    );
                    error!("{}", message);
                    sink.emit(&message);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!("Worker {} got no task within {:?}", worker_id, task_timeout);
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task queue drained", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
