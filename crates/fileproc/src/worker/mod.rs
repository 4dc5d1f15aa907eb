pub mod isolate;
pub mod pool;
pub mod queue;
pub mod task;
pub mod transform;

pub use isolate::{ChildOutcome, IsolatedRun, SafetyShim};
pub use pool::{ExecutionMode, ShutdownReport, WorkerPool, WorkerSettings};
pub use queue::TaskQueue;
pub use task::{ErrorMap, FileTask, Item, Metadata, WorkResult, CPU_DEVICE};
pub use transform::{Transform, TransformError, TransformResult};
