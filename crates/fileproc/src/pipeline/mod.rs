pub mod aggregator;
pub mod context;
pub mod process;
pub mod progress;
pub mod stages;
pub mod transition;

pub use aggregator::{DrainReport, ResultAggregator};
pub use context::{StageInput, StageResult};
pub use process::{process, PostProcessFn, ProcessOptions, ProcessReport, Processor, Timeouts};
pub use progress::{
    BarProgress, DiagnosticsSink, NoopProgress, NoopSink, ProgressEvent, ProgressReporter,
    SharedSink, TracingSink,
};
pub use stages::{CallbackFn, StageFn, StageHistory, StagePipeline, TransitionFn};
pub use transition::{files_transition, remap_path};
