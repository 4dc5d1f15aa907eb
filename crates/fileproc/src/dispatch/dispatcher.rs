use log::{debug, info};

use crate::error::DispatchError;
use crate::worker::queue::TaskQueue;
use crate::worker::task::{FileTask, Item, CPU_DEVICE};

use super::device::{DeviceEnumerator, DeviceMode};

/// Tags tasks with a device label and sizes the worker pool.
///
/// Devices are enumerated once, at construction; labels are assigned by
/// submission index, so they do not depend on which worker picks a task up.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    mode: DeviceMode,
    devices: Vec<String>,
    cpu_count: usize,
}

impl Dispatcher {
    pub fn new(mode: DeviceMode, enumerator: &dyn DeviceEnumerator) -> Result<Self, DispatchError> {
        let devices = match mode {
            DeviceMode::Cpu => Vec::new(),
            DeviceMode::Accelerator => {
                let devices = enumerator.devices();
                if devices.is_empty() {
                    return Err(DispatchError::NoAcceleratorDevices);
                }
                info!("Using {} accelerator devices: {:?}", devices.len(), devices);
                devices
            }
        };

        Ok(Self {
            mode,
            devices,
            cpu_count: num_cpus::get().max(1),
        })
    }

    /// Overrides the detected core count.
    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count.max(1);
        self
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Core count in cpu mode, device count in accelerator mode.
    pub fn resource_cap(&self) -> usize {
        match self.mode {
            DeviceMode::Cpu => self.cpu_count,
            DeviceMode::Accelerator => self.devices.len().max(1),
        }
    }

    /// `min(requested, resource_cap, task_count)`; `requested` defaults to
    /// the core count.
    pub fn worker_count(&self, requested: Option<usize>, task_count: usize) -> usize {
        let requested = requested.unwrap_or(self.cpu_count);
        requested.min(self.resource_cap()).min(task_count)
    }

    /// Device label for the task at submission index `index`.
    pub fn device_for(&self, index: usize) -> &str {
        match self.mode {
            DeviceMode::Cpu => CPU_DEVICE,
            DeviceMode::Accelerator => &self.devices[index % self.devices.len()],
        }
    }

    pub fn assign(&self, items: Vec<Item>) -> Vec<FileTask> {
        items
            .into_iter()
            .enumerate()
            .map(|(index, (path, metadata))| FileTask::new(path, metadata, self.device_for(index)))
            .collect()
    }

    pub fn enqueue(&self, items: Vec<Item>) -> TaskQueue {
        let tasks = self.assign(items);
        debug!("Enqueued {} tasks in {} mode", tasks.len(), self.mode.as_str());
        TaskQueue::from_tasks(tasks)
    }
}
