use crossbeam_channel::{bounded, Receiver};

use super::task::FileTask;

/// Bounded FIFO of tasks, filled completely before any worker starts.
///
/// The sending half is dropped once the queue is full, so an empty queue is
/// also a disconnected one and idle workers exit instead of waiting out their
/// task timeout.
pub struct TaskQueue {
    receiver: Receiver<FileTask>,
    total: usize,
}

impl TaskQueue {
    pub fn from_tasks(tasks: Vec<FileTask>) -> Self {
        let total = tasks.len();
        let (sender, receiver) = bounded(total.max(1));
        for task in tasks {
            // Capacity equals the task count and the receiver is alive.
            let _ = sender.send(task);
        }
        drop(sender);
        Self { receiver, total }
    }

    /// Number of tasks enqueued, fixed at construction.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Tasks not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub(crate) fn receiver(&self) -> Receiver<FileTask> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::task::{Metadata, CPU_DEVICE};

    #[test]
    fn test_queue_is_fifo_and_drains() {
        let tasks = (0..3)
            .map(|i| FileTask::new(format!("f{}.py", i), Metadata::new(), CPU_DEVICE))
            .collect();
        let queue = TaskQueue::from_tasks(tasks);
        assert_eq!(queue.total(), 3);
        assert_eq!(queue.pending(), 3);

        let rx = queue.receiver();
        let order: Vec<String> = rx
            .iter()
            .map(|t| t.path.display().to_string())
            .collect();
        assert_eq!(order, vec!["f0.py", "f1.py", "f2.py"]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_empty_queue_is_disconnected() {
        let queue = TaskQueue::from_tasks(Vec::new());
        assert_eq!(queue.total(), 0);
        assert!(queue.receiver().recv().is_err());
    }
}
