use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use log::{debug, warn};

use crate::worker::pool::WorkerPool;
use crate::worker::task::ErrorMap;

use super::context::StageResult;
use super::progress::{ProgressEvent, ProgressReporter};

/// Outcome of draining a pool's result queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub result: StageResult,
    pub received: usize,
    pub total: usize,
}

impl DrainReport {
    /// Tasks that never produced a result because their worker died.
    pub fn missing(&self) -> usize {
        self.total.saturating_sub(self.received)
    }
}

/// Collects results until every task reported or every worker is gone.
pub struct ResultAggregator {
    poll_interval: Duration,
    progress: Arc<dyn ProgressReporter>,
}

impl ResultAggregator {
    pub fn new(poll_interval: Duration, progress: Arc<dyn ProgressReporter>) -> Self {
        Self {
            poll_interval,
            progress,
        }
    }

    /// Drains `pool`, seeding the error map with `errors` from earlier stages.
    ///
    /// When the queue stays empty for a poll interval and no worker is alive
    /// anymore, draining stops even if fewer than `total` results arrived.
    /// Lost tasks are counted in `DrainReport::missing`, never retried.
    pub fn drain(
        &self,
        pool: &WorkerPool,
        total: usize,
        description: &str,
        errors: ErrorMap,
    ) -> DrainReport {
        let mut result = StageResult::new(Vec::new(), Vec::new(), errors);
        let mut received = 0usize;

        self.progress.report(ProgressEvent::Started {
            description: description.to_string(),
            total: total as u64,
        });

        while received < total {
            match pool.recv_timeout(self.poll_interval) {
                Ok(work) => {
                    result.record(work);
                    received += 1;
                    self.progress.report(ProgressEvent::Advanced {
                        completed: received as u64,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    if pool.all_finished() {
                        // A worker may have reported right before exiting.
                        while let Some(work) = pool.try_recv_result() {
                            result.record(work);
                            received += 1;
                        }
                        debug!("All workers exited while waiting for results");
                        break;
                    }
                    debug!(
                        "No result within {:?}, {} workers alive",
                        self.poll_interval,
                        pool.alive_count()
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Result queue disconnected");
                    break;
                }
            }
        }

        self.progress.report(ProgressEvent::Finished {
            completed: received as u64,
            total: total as u64,
        });

        let report = DrainReport {
            result,
            received,
            total,
        };
        if report.missing() > 0 {
            warn!(
                "{} of {} tasks never reported a result (worker died mid-task)",
                report.missing(),
                total
            );
        }
        report
    }
}
