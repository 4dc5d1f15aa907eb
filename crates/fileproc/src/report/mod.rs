//! End-of-pipeline reports built from a [`StageHistory`].

pub mod errors;
pub mod meta;
pub mod relative;
pub mod stats;

use std::path::{Path, PathBuf};

use log::info;
use serde_json::{Map, Value};

use crate::error::{ReportError, Result};
use crate::pipeline::{DiagnosticsSink, SharedSink, StageHistory};

pub use errors::{aggregate_errors, error_map_json};
pub use meta::{save_meta, SaveMetaOptions, StageSelector};
pub use relative::{relative_path, to_relative, JSON_PATH_PREFIX};
pub use stats::{calculate_stats, is_regex_pattern, FieldSpec, StageStats};

pub(crate) fn write_json(path: &Path, value: &Value) -> std::result::Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ReportError::WriteFile {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).map_err(|e| ReportError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn maybe_relative(value: Value, relative: bool, output: &Path) -> Value {
    if relative {
        to_relative(value, output.parent().unwrap_or(Path::new(".")))
    } else {
        value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetStatsOptions {
    /// Where the `{path: reason}` map of the last stage goes.
    pub failed_output: Option<PathBuf>,
    pub stat_output: Option<PathBuf>,
    pub relative: bool,
    pub stage_stats: Vec<StageStats>,
}

/// Writes the failures of the last stage and a statistics document made of
/// every [`StageStats`] plus the error summary. The document is also echoed
/// to `sink` and returned.
pub fn dataset_stats(
    history: &StageHistory,
    options: &DatasetStatsOptions,
    sink: &dyn DiagnosticsSink,
) -> std::result::Result<Value, ReportError> {
    let (_, last) = history.last().ok_or(ReportError::EmptyHistory)?;

    if let Some(output) = &options.failed_output {
        let failed = maybe_relative(error_map_json(&last.errors), options.relative, output);
        write_json(output, &failed)?;
        sink.emit(&format!("Save {}", output.display()));
    }

    let mut stats = Map::new();
    for spec in &options.stage_stats {
        spec.compute(history, &mut stats)?;
    }
    stats.insert("errors".to_string(), aggregate_errors(&last.errors));
    let stats = Value::Object(stats);

    if let Some(output) = &options.stat_output {
        write_json(output, &maybe_relative(stats.clone(), options.relative, output))?;
        info!("Save {}", output.display());
    }

    sink.emit(&serde_json::to_string_pretty(&stats)?);
    if let Some(output) = &options.stat_output {
        sink.emit(&format!("Save {}", output.display()));
    }
    Ok(stats)
}

/// [`save_meta`] as a pipeline callback.
pub fn save_meta_callback(options: SaveMetaOptions) -> impl FnMut(&StageHistory) -> Result<()> {
    move |history: &StageHistory| {
        save_meta(history, &options)?;
        Ok(())
    }
}

/// [`dataset_stats`] as a pipeline callback.
pub fn dataset_stats_callback(
    options: DatasetStatsOptions,
    sink: SharedSink,
) -> impl FnMut(&StageHistory) -> Result<()> {
    move |history: &StageHistory| {
        dataset_stats(history, &options, sink.as_ref())?;
        Ok(())
    }
}
