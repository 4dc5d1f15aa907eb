use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::worker::task::ErrorMap;

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `{path: reason}` for every failed item.
pub fn error_map_json(errors: &ErrorMap) -> Value {
    let map: Map<String, Value> = errors
        .iter()
        .map(|(path, reason)| (path_key(path), Value::String(reason.clone())))
        .collect();
    Value::Object(map)
}

/// Groups failures by reason: `{reason: {count, example}}`, reasons sorted,
/// the example being the first path (in path order) that failed that way.
pub fn aggregate_errors(errors: &ErrorMap) -> Value {
    let mut grouped: BTreeMap<&str, (usize, &Path)> = BTreeMap::new();
    for (path, reason) in errors {
        grouped
            .entry(reason.as_str())
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, path.as_path()));
    }

    let map: Map<String, Value> = grouped
        .into_iter()
        .map(|(reason, (count, example))| {
            (
                reason.to_string(),
                json!({ "count": count, "example": path_key(example) }),
            )
        })
        .collect();
    Value::Object(map)
}
