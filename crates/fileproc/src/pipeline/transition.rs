use std::path::{Path, PathBuf};

use crate::error::{Result, TransitionError};
use crate::worker::task::Item;

use super::context::StageResult;

/// Moves `path` from under `source_root` to under `dest_root` and swaps its
/// extension for `dest_suffix` (with or without the leading dot).
pub fn remap_path(
    path: &Path,
    source_root: &Path,
    dest_root: &Path,
    dest_suffix: &str,
) -> std::result::Result<PathBuf, TransitionError> {
    let relative = path
        .strip_prefix(source_root)
        .map_err(|_| TransitionError::OutsideRoot {
            path: path.to_path_buf(),
            root: source_root.to_path_buf(),
        })?;

    let mut remapped = dest_root.join(relative);
    remapped.set_extension(dest_suffix.trim_start_matches('.'));
    Ok(remapped)
}

fn remap_items(
    items: Vec<Item>,
    source_root: &Path,
    dest_root: &Path,
    dest_suffix: &str,
) -> std::result::Result<Vec<Item>, TransitionError> {
    items
        .into_iter()
        .map(|(path, meta)| Ok((remap_path(&path, source_root, dest_root, dest_suffix)?, meta)))
        .collect()
}

/// Builds a transition that points the next stage at the files the previous
/// stage materialized under `dest_root`. Error keys keep their original paths.
pub fn files_transition(
    source_root: impl Into<PathBuf>,
    dest_root: impl Into<PathBuf>,
    dest_suffix: impl Into<String>,
) -> impl Fn(StageResult) -> Result<StageResult> {
    let source_root = source_root.into();
    let dest_root = dest_root.into();
    let dest_suffix = dest_suffix.into();

    move |result: StageResult| {
        let (all_items, filtered_items, errors) = result.into_parts();
        Ok(StageResult::new(
            remap_items(all_items, &source_root, &dest_root, &dest_suffix)?,
            remap_items(filtered_items, &source_root, &dest_root, &dest_suffix)?,
            errors,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileprocError;
    use crate::worker::task::{ErrorMap, Metadata};

    #[test]
    fn test_remap_path() {
        let remapped = remap_path(
            Path::new("/data/py/sub/part_1.py"),
            Path::new("/data/py"),
            Path::new("/data/stl"),
            ".stl",
        )
        .unwrap();
        assert_eq!(remapped, PathBuf::from("/data/stl/sub/part_1.stl"));
    }

    #[test]
    fn test_files_transition_keeps_metadata_and_errors() {
        let mut meta = Metadata::new();
        meta.insert("faces".to_string(), 12.into());
        let mut errors = ErrorMap::new();
        errors.insert(PathBuf::from("/src/bad.py"), "syntax".to_string());

        let transition = files_transition("/src", "/out", "stl");
        let result = transition(StageResult::new(
            vec![
                (PathBuf::from("/src/a.py"), meta.clone()),
                (PathBuf::from("/src/bad.py"), Metadata::new()),
            ],
            vec![(PathBuf::from("/src/a.py"), meta.clone())],
            errors.clone(),
        ))
        .unwrap();

        assert_eq!(
            result.all_paths(),
            vec![Path::new("/out/a.stl"), Path::new("/out/bad.stl")]
        );
        assert_eq!(result.filtered_items[0].1, meta);
        assert_eq!(result.errors, errors);
    }

    #[test]
    fn test_path_outside_root_fails() {
        let transition = files_transition("/src", "/out", ".stl");
        let err = transition(StageResult::new(
            vec![(PathBuf::from("/elsewhere/a.py"), Metadata::new())],
            Vec::new(),
            ErrorMap::new(),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            FileprocError::Transition(TransitionError::OutsideRoot { .. })
        ));
    }
}
