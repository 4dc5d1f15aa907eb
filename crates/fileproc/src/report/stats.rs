//! Descriptive statistics over metadata fields collected by a stage.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ReportError;
use crate::pipeline::StageHistory;

const REGEX_SPECIAL: [char; 13] = [
    '*', '+', '?', '^', '$', '[', ']', '(', ')', '{', '}', '|', '\\',
];

const QUANTILES: [(f64, &str); 3] = [(0.25, "25"), (0.75, "75"), (0.90, "90")];

/// A metadata key to summarize. Keys that look like a regular expression
/// expand to every key they match (anchored at the start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    #[serde(default)]
    pub store_examples: bool,
}

impl FieldSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            store_examples: false,
        }
    }

    pub fn with_examples(mut self) -> Self {
        self.store_examples = true;
        self
    }
}

/// True when `key` contains regex metacharacters and compiles.
pub fn is_regex_pattern(key: &str) -> bool {
    key.contains(REGEX_SPECIAL) && Regex::new(key).is_ok()
}

fn anchored(pattern: &str) -> Result<Regex, ReportError> {
    Regex::new(&format!("^(?:{})", pattern)).map_err(|e| ReportError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| !v.is_nan()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

struct FieldValues {
    field: String,
    store_examples: bool,
    paths: Vec<Value>,
    values: Vec<f64>,
}

/// Groups values per field in the order fields are first seen.
#[derive(Default)]
struct Collector {
    fields: Vec<FieldValues>,
}

impl Collector {
    fn push(&mut self, field: &str, store_examples: bool, path: &Value, value: f64) {
        let index = match self.fields.iter().position(|f| f.field == field) {
            Some(index) => index,
            None => {
                self.fields.push(FieldValues {
                    field: field.to_string(),
                    store_examples,
                    paths: Vec::new(),
                    values: Vec::new(),
                });
                self.fields.len() - 1
            }
        };
        let entry = &mut self.fields[index];
        entry.store_examples = store_examples;
        entry.paths.push(path.clone());
        entry.values.push(value);
    }
}

fn arg_extreme(values: &[f64], better: impl Fn(f64, f64) -> bool) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if better(*v, values[best]) {
            best = i;
        }
    }
    best
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

fn closest(values: &[f64], paths: &[Value], target: f64) -> Value {
    let index = arg_extreme(values, |a, b| (a - target).abs() < (b - target).abs());
    paths.get(index).cloned().unwrap_or(Value::Null)
}

fn example(paths: &[Value], index: usize) -> Value {
    match paths.get(index) {
        Some(Value::Null) | None => json!("unknown"),
        Some(Value::String(s)) if s.is_empty() => json!("unknown"),
        Some(path) => path.clone(),
    }
}

/// Summarizes `data`, a list of `(path, object)` pairs, over `fields`.
///
/// Returns `Value::Null` for empty input. `is_*` fields yield a count and a
/// ratio; other fields yield mean, median, min, max, population std and
/// the 25/75/90 quantiles. Fields whose statistics are all zero are left out.
pub fn calculate_stats(data: &[(Value, Value)], fields: &[FieldSpec]) -> Result<Value, ReportError> {
    if data.is_empty() {
        return Ok(Value::Null);
    }

    let mut matchers = Vec::with_capacity(fields.len());
    for spec in fields {
        let matcher = if is_regex_pattern(&spec.key) {
            Some(anchored(&spec.key)?)
        } else {
            None
        };
        matchers.push((spec, matcher));
    }

    let mut collector = Collector::default();
    for (path, record) in data {
        let Some(object) = record.as_object() else {
            continue;
        };
        for (spec, matcher) in &matchers {
            match matcher {
                None => {
                    if let Some(v) = object.get(&spec.key).and_then(numeric) {
                        collector.push(&spec.key, spec.store_examples, path, v);
                    }
                }
                Some(regex) => {
                    for (key, value) in object.iter().filter(|(k, _)| regex.is_match(k)) {
                        if let Some(v) = numeric(value) {
                            collector.push(key, spec.store_examples, path, v);
                        }
                    }
                }
            }
        }
    }

    let count = data.len();
    let mut result = Map::new();
    result.insert("count".to_string(), json!(count));
    let mut examples = Map::new();

    for FieldValues {
        field,
        store_examples,
        paths,
        values,
    } in collector.fields
    {
        if values.is_empty() {
            continue;
        }
        let min_idx = arg_extreme(&values, |a, b| a < b);
        let max_idx = arg_extreme(&values, |a, b| a > b);

        if field.starts_with("is_") {
            let total: f64 = values.iter().sum();
            result.insert(format!("{}_count", field), json!(total as i64));
            result.insert(format!("{}_ratio", field), json!(total / count as f64));

            if store_examples && !(min_idx == max_idx && values[max_idx] == 0.0) {
                examples.insert(field.clone(), example(&paths, max_idx));
            }
            continue;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = quantile(&sorted, 0.5);
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];

        if [mean, median, min, max, std].iter().all(|v| *v == 0.0) {
            continue;
        }

        result.insert(format!("{}_mean", field), json!(mean));
        result.insert(format!("{}_median", field), json!(median));
        result.insert(format!("{}_min", field), json!(min));
        result.insert(format!("{}_max", field), json!(max));
        result.insert(format!("{}_std", field), json!(std));
        let quantiles: Vec<(&str, f64)> = QUANTILES
            .iter()
            .map(|(q, label)| (*label, quantile(&sorted, *q)))
            .collect();
        for (label, value) in &quantiles {
            result.insert(format!("{}_quantile_{}", field, label), json!(value));
        }

        if store_examples && min_idx != max_idx {
            examples.insert(format!("min_{}", field), example(&paths, min_idx));
            examples.insert(format!("max_{}", field), example(&paths, max_idx));
            examples.insert(format!("mean_{}", field), closest(&values, &paths, mean));
            examples.insert(format!("median_{}", field), closest(&values, &paths, median));
            for (label, value) in &quantiles {
                examples.insert(
                    format!("quantile_{}_{}", label, field),
                    closest(&values, &paths, *value),
                );
            }
        }
    }

    result.insert("examples".to_string(), Value::Object(examples));
    Ok(Value::Object(result))
}

/// Statistics over `stats_key` objects in one stage's metadata, compared
/// against the items the last stage accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub stage: String,
    /// Metadata key naming the file a record belongs to.
    pub file_key: String,
    /// Metadata key holding the object to summarize.
    pub stats_key: String,
    pub fields: Vec<FieldSpec>,
}

impl StageStats {
    /// Adds `stats[stats_key] = {all_<file_key>, filtered_<file_key>}`.
    pub fn compute(
        &self,
        history: &StageHistory,
        stats: &mut Map<String, Value>,
    ) -> Result<(), ReportError> {
        let stage = history.require(&self.stage)?;
        let (_, last) = history.last().ok_or(ReportError::EmptyHistory)?;

        let all = self.records(stage.all_items.iter().map(|(_, meta)| meta));
        let filtered = self.records(last.filtered_items.iter().map(|(_, meta)| meta));

        let mut entry = Map::new();
        entry.insert(
            format!("all_{}", self.file_key),
            calculate_stats(&all, &self.fields)?,
        );
        entry.insert(
            format!("filtered_{}", self.file_key),
            calculate_stats(&filtered, &self.fields)?,
        );
        stats.insert(self.stats_key.clone(), Value::Object(entry));
        Ok(())
    }

    fn records<'a>(
        &self,
        metadata: impl Iterator<Item = &'a Map<String, Value>>,
    ) -> Vec<(Value, Value)> {
        metadata
            .filter_map(|meta| {
                Some((
                    meta.get(&self.file_key)?.clone(),
                    meta.get(&self.stats_key)?.clone(),
                ))
            })
            .collect()
    }
}
