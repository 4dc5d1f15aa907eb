use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReportError;
use crate::pipeline::{StageHistory, StageResult};

use super::relative::to_relative;
use super::write_json;

/// Which stage of a history a report reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageSelector {
    #[default]
    Last,
    /// Position in execution order.
    Index(usize),
    Named(String),
}

impl StageSelector {
    pub fn select<'a>(&self, history: &'a StageHistory) -> Result<&'a StageResult, ReportError> {
        match self {
            StageSelector::Last => history
                .last()
                .map(|(_, result)| result)
                .ok_or(ReportError::EmptyHistory),
            StageSelector::Index(index) => history
                .iter()
                .nth(*index)
                .map(|(_, result)| result)
                .ok_or_else(|| ReportError::UnknownStage(format!("#{}", index))),
            StageSelector::Named(name) => history.require(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveMetaOptions {
    pub output: PathBuf,
    pub stage: StageSelector,
    /// Export only accepted items instead of every processed item.
    pub filtered_only: bool,
    /// Rewrite existing paths relative to the output file.
    pub relative: bool,
}

impl SaveMetaOptions {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            stage: StageSelector::Last,
            filtered_only: false,
            relative: false,
        }
    }
}

/// Writes the metadata objects of one stage as a JSON array and returns how
/// many were written.
pub fn save_meta(history: &StageHistory, options: &SaveMetaOptions) -> Result<usize, ReportError> {
    let result = options.stage.select(history)?;
    let items = if options.filtered_only {
        &result.filtered_items
    } else {
        &result.all_items
    };

    let mut value = Value::Array(
        items
            .iter()
            .map(|(_, meta)| Value::Object(meta.clone()))
            .collect(),
    );
    if options.relative {
        value = to_relative(value, options.output.parent().unwrap_or(Path::new(".")));
    }

    write_json(&options.output, &value)?;
    info!("Save {}", options.output.display());
    Ok(items.len())
}
