//! Resolution of input specifications into ordered `(path, metadata)` items.

pub mod natural;

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};
use walkdir::WalkDir;

use crate::error::SourceError;
use crate::worker::task::{Item, Metadata};

pub use natural::{natural_cmp, natural_sort_paths};

const GLOB_TOKENS: [char; 4] = ['*', '?', '[', ']'];

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Where the items of a run come from when no item list is supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskSource {
    /// Files under `root` (recursively) whose name matches `pattern`.
    Pattern { root: PathBuf, pattern: String },
    /// Annotation files (JSON arrays of paths), plain paths or glob patterns.
    Annotations(Vec<String>),
}

impl TaskSource {
    pub fn pattern(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        TaskSource::Pattern {
            root: root.into(),
            pattern: pattern.into(),
        }
    }

    pub fn annotations<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaskSource::Annotations(entries.into_iter().map(Into::into).collect())
    }

    /// Resolves to items with empty metadata, in deterministic order.
    pub fn resolve(&self) -> Result<Vec<Item>, SourceError> {
        let paths = match self {
            TaskSource::Pattern { root, pattern } => scan_pattern(root, pattern)?,
            TaskSource::Annotations(entries) => {
                let mut paths = Vec::new();
                for entry in entries {
                    paths.extend(annotation_paths(entry)?);
                }
                paths
            }
        };

        Ok(paths.into_iter().map(|p| (p, Metadata::new())).collect())
    }
}

fn has_glob_tokens(text: &str) -> bool {
    text.contains(GLOB_TOKENS)
}

fn compile(pattern: &str) -> Result<Pattern, SourceError> {
    Pattern::new(pattern).map_err(|e| SourceError::InvalidGlob {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Recursive search under `root`. A pattern without a separator matches file
/// names; one with a separator matches the tail of the path relative to root.
pub fn scan_pattern(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let _span = info_span!("scan_pattern", root = %root.display(), pattern).entered();

    let by_name = !pattern.contains('/');
    let matcher = if by_name {
        compile(pattern)?
    } else {
        compile(&format!("**/{}", pattern.trim_start_matches('/')))?
    };

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| SourceError::ScanFailed {
            path: root.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let matched = if by_name {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|name| matcher.matches(name))
                .unwrap_or(false)
        } else {
            path.strip_prefix(root)
                .map(|rel| matcher.matches_path_with(rel, PATH_MATCH))
                .unwrap_or(false)
        };

        if matched {
            debug!("Matched {}", path.display());
            paths.push(path.to_path_buf());
        }
    }

    natural_sort_paths(&mut paths);
    info!("Found {} files matching '{}' in {}", paths.len(), pattern, root.display());
    Ok(paths)
}

/// Resolves one annotation entry.
///
/// An existing `.json` file is read as an array of paths, relative entries
/// resolving against the file's directory. Any other existing path is taken
/// as is. Everything else is treated as a glob pattern.
pub fn annotation_paths(entry: &str) -> Result<Vec<PathBuf>, SourceError> {
    let candidate = Path::new(entry);

    if candidate.exists() && !has_glob_tokens(entry) {
        let is_json = candidate
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if !is_json {
            return Ok(vec![candidate.to_path_buf()]);
        }
        return read_annotation_file(candidate);
    }

    let mut matches: Vec<PathBuf> = glob::glob(entry)
        .map_err(|e| SourceError::InvalidGlob {
            pattern: entry.to_string(),
            reason: e.to_string(),
        })?
        .filter_map(|p| p.ok())
        .collect();

    if matches.is_empty() {
        return Err(SourceError::PatternNotFound(entry.to_string()));
    }

    natural_sort_paths(&mut matches);
    Ok(matches)
}

fn read_annotation_file(path: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let content = std::fs::read_to_string(path).map_err(|e| SourceError::ReadAnnotation {
        path: path.to_path_buf(),
        source: e,
    })?;

    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| SourceError::InvalidAnnotation {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let entries = value.as_array().ok_or_else(|| SourceError::InvalidAnnotation {
        path: path.to_path_buf(),
        message: "must contain a JSON array".to_string(),
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let resolved: Vec<PathBuf> = entries
        .iter()
        .filter_map(|e| e.as_str())
        .map(|entry| {
            let p = Path::new(entry);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        })
        .collect();

    if resolved.is_empty() {
        return Err(SourceError::InvalidAnnotation {
            path: path.to_path_buf(),
            message: "no paths could be resolved".to_string(),
        });
    }

    debug!("Resolved {} paths from {}", resolved.len(), path.display());
    Ok(resolved)
}
