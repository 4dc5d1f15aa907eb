pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod worker;

pub use config::{load_config, load_config_from_str, ConfigFormat, EngineConfig};
pub use dispatch::{DeviceEnumerator, DeviceMode, Dispatcher};
pub use error::{
    ConfigError, DispatchError, FileprocError, ReportError, Result, SourceError, TransitionError,
    WorkerError,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use pipeline::{
    files_transition, process, DiagnosticsSink, ProcessOptions, ProcessReport, Processor,
    StageHistory, StageInput, StagePipeline, StageResult, Timeouts,
};
pub use report::{dataset_stats, save_meta, DatasetStatsOptions, SaveMetaOptions, StageStats};
pub use source::TaskSource;
pub use worker::{
    ErrorMap, FileTask, Item, Metadata, SafetyShim, Transform, TransformError, TransformResult,
    WorkResult, WorkerPool,
};
