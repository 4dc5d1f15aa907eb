use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileprocError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task source error: {0}")]
    Source(#[from] SourceError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Safety mode work only on cpu")]
    SafetyRequiresCpu,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("There are no matching files")]
    NoMatchingItems,

    #[error("No files found using pattern '{0}'")]
    PatternNotFound(String),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("Failed to read annotation file '{path}': {source}")]
    ReadAnnotation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid annotation file '{path}': {message}")]
    InvalidAnnotation { path: PathBuf, message: String },

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No CUDA devices found or visible")]
    NoAcceleratorDevices,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Unsupported execution mode: {0}")]
    Unsupported(String),
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Path '{path}' is not inside '{root}'")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Transition for stage '{stage}' failed: {message}")]
    Failed { stage: String, message: String },
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Stage '{0}' not found in pipeline history")]
    UnknownStage(String),

    #[error("Pipeline history is empty")]
    EmptyHistory,

    #[error("Invalid field pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FileprocError>;
