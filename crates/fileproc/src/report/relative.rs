//! Rewrites paths inside report JSON so they are relative to the report file.

use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};

/// Placeholder standing for the directory the JSON file lives in.
pub const JSON_PATH_PREFIX: &str = "{json_path}";

/// Replaces every string (object keys included) that names an existing path
/// with `{json_path}/<path relative to root>`. Other values are untouched.
pub fn to_relative(value: Value, root: &Path) -> Value {
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    rewrite(value, &root)
}

fn rewrite(value: Value, root: &Path) -> Value {
    match value {
        Value::String(s) => Value::String(rewrite_str(s, root)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| rewrite(v, root)).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                out.insert(rewrite_str(key, root), rewrite(v, root));
            }
            Value::Object(out)
        }
        other => other,
    }
}

fn rewrite_str(s: String, root: &Path) -> String {
    if s.is_empty() {
        return s;
    }
    match std::fs::canonicalize(&s) {
        Ok(resolved) => Path::new(JSON_PATH_PREFIX)
            .join(relative_path(&resolved, root))
            .to_string_lossy()
            .into_owned(),
        Err(_) => s,
    }
}

/// `path` relative to `base`, stepping up with `..` where needed. Both are
/// expected to be absolute and normalized.
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[common..] {
        relative.push(part.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}
