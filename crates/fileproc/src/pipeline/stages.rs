use std::time::{Duration, Instant};

use tracing::{info, info_span};

use crate::error::{ReportError, Result};

use super::context::{StageInput, StageResult};
use super::progress::{NoopSink, SharedSink};

pub type StageFn = Box<dyn FnMut(StageInput) -> Result<StageResult>>;
pub type TransitionFn = Box<dyn Fn(StageResult) -> Result<StageResult>>;
pub type CallbackFn = Box<dyn FnMut(&StageHistory) -> Result<()>>;

/// Stage results in execution order, keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageHistory {
    entries: Vec<(String, StageResult)>,
}

impl StageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, result: StageResult) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = result,
            None => self.entries.push((name, result)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&StageResult> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Looks up a stage that callbacks expect to exist.
    pub fn require(&self, name: &str) -> std::result::Result<&StageResult, ReportError> {
        self.get(name)
            .ok_or_else(|| ReportError::UnknownStage(name.to_string()))
    }

    pub fn last(&self) -> Option<(&str, &StageResult)> {
        self.entries.last().map(|(n, r)| (n.as_str(), r))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageResult)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Stage {
    name: String,
    run: StageFn,
    transition: Option<TransitionFn>,
}

struct Callback {
    name: String,
    run: CallbackFn,
}

/// Ordered stages with optional transitions between them, followed by
/// callbacks that see the full history.
pub struct StagePipeline {
    stages: Vec<Stage>,
    callbacks: Vec<Callback>,
    sink: SharedSink,
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StagePipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            callbacks: Vec::new(),
            sink: std::sync::Arc::new(NoopSink),
        }
    }

    /// Appends a stage. Registering an existing name replaces that stage's
    /// function but keeps its position.
    pub fn stage<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: FnMut(StageInput) -> Result<StageResult> + 'static,
    {
        let name = name.into();
        match self.stages.iter_mut().find(|s| s.name == name) {
            Some(stage) => stage.run = Box::new(run),
            None => self.stages.push(Stage {
                name,
                run: Box::new(run),
                transition: None,
            }),
        }
        self
    }

    /// Rewrites the output of `stage` into the input of the next stage. The
    /// history keeps the untransformed output. Ignored for unknown stages.
    pub fn transition<F>(mut self, stage: &str, transition: F) -> Self
    where
        F: Fn(StageResult) -> Result<StageResult> + 'static,
    {
        if let Some(target) = self.stages.iter_mut().find(|s| s.name == stage) {
            target.transition = Some(Box::new(transition));
        } else {
            log::warn!("Transition for unknown stage '{}' ignored", stage);
        }
        self
    }

    pub fn callback<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: FnMut(&StageHistory) -> Result<()> + 'static,
    {
        self.callbacks.push(Callback {
            name: name.into(),
            run: Box::new(callback),
        });
        self
    }

    /// Receives stage names, durations and the callback marker.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Runs every stage in order, then every callback. The first error
    /// aborts the run.
    pub fn run(&mut self) -> Result<StageHistory> {
        let mut history = StageHistory::new();
        let mut input = StageInput::empty();

        for stage in self.stages.iter_mut() {
            let _span = info_span!("stage", name = %stage.name).entered();
            self.sink.emit(&stage.name);

            // Without a transition the next stage sees the same item lists.
            let previous_all = input.all_items.clone();
            let previous_filtered = input.filtered_items.clone();

            let started = Instant::now();
            let output = (stage.run)(input)?;
            let elapsed = started.elapsed();
            emit_duration(&self.sink, &stage.name, elapsed);
            info!(
                all = output.all_items.len(),
                filtered = output.filtered_items.len(),
                errors = output.errors.len(),
                "Stage {} took {:.3}s",
                stage.name,
                elapsed.as_secs_f64()
            );

            input = match &stage.transition {
                Some(transition) => StageInput::from(transition(output.clone())?),
                None => StageInput {
                    all_items: previous_all,
                    filtered_items: previous_filtered,
                    errors: output.errors.clone(),
                },
            };
            history.insert(stage.name.clone(), output);
        }

        self.sink.emit("Do callbacks");
        for callback in self.callbacks.iter_mut() {
            let _span = info_span!("callback", name = %callback.name).entered();
            self.sink.emit(&callback.name);

            let started = Instant::now();
            (callback.run)(&history)?;
            emit_duration(&self.sink, &callback.name, started.elapsed());
        }

        Ok(history)
    }
}

fn emit_duration(sink: &SharedSink, name: &str, elapsed: Duration) {
    sink.emit(&format!("{} duration: {:.3}s", name, elapsed.as_secs_f64()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FileprocError, TransitionError};
    use crate::worker::task::{ErrorMap, Item, Metadata};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    fn items(names: &[&str]) -> Vec<Item> {
        names
            .iter()
            .map(|n| (PathBuf::from(n), Metadata::new()))
            .collect()
    }

    #[test]
    fn test_stage_without_transition_keeps_input_lists() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_second = Rc::clone(&seen);

        let mut pipeline = StagePipeline::new()
            .stage("first", |input: StageInput| {
                assert!(input.is_empty());
                let mut errors = ErrorMap::new();
                errors.insert(PathBuf::from("b"), "unreadable".to_string());
                Ok(StageResult::new(items(&["a", "b"]), Vec::new(), errors))
            })
            .stage("second", move |input: StageInput| {
                seen_second.borrow_mut().push(input.clone());
                Ok(StageResult::new(items(&["c"]), items(&["c"]), input.errors))
            });

        let history = pipeline.run().unwrap();
        assert_eq!(history.names(), vec!["first", "second"]);

        // The second stage resolves its own items; only errors carry over.
        let seen = seen.borrow();
        assert!(seen[0].is_empty());
        assert_eq!(seen[0].errors[&PathBuf::from("b")], "unreadable");
        assert_eq!(history.get("second").unwrap().errors.len(), 1);
    }

    #[test]
    fn test_stage_without_transition_passes_explicit_lists_through() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_third = Rc::clone(&seen);

        let mut pipeline = StagePipeline::new()
            .stage("first", |_| {
                Ok(StageResult::new(items(&["a", "b"]), items(&["a"]), ErrorMap::new()))
            })
            .transition("first", Ok)
            .stage("second", |_| {
                Ok(StageResult::new(Vec::new(), Vec::new(), ErrorMap::new()))
            })
            .stage("third", move |input: StageInput| {
                seen_third
                    .borrow_mut()
                    .extend(input.filtered_items.unwrap_or_default().into_iter().map(|(p, _)| p));
                Ok(StageResult::default())
            });

        pipeline.run().unwrap();
        assert_eq!(*seen.borrow(), vec![PathBuf::from("a")]);
    }

    #[test]
    fn test_transition_rewrites_output() {
        let mut pipeline = StagePipeline::new()
            .stage("convert", |_| {
                Ok(StageResult::new(items(&["x.stl"]), items(&["x.stl"]), ErrorMap::new()))
            })
            .transition("convert", |mut result| {
                for (path, _) in result.filtered_items.iter_mut() {
                    path.set_extension("obj");
                }
                Ok(result)
            })
            .stage("check", |input: StageInput| {
                let filtered = input.filtered_items.unwrap_or_default();
                assert_eq!(filtered[0].0, PathBuf::from("x.obj"));
                Ok(StageResult::new(filtered.clone(), filtered, ErrorMap::new()))
            });

        let history = pipeline.run().unwrap();
        // History keeps what the stage itself produced.
        assert_eq!(
            history.get("convert").unwrap().filtered_items[0].0,
            PathBuf::from("x.stl")
        );
    }

    #[test]
    fn test_callbacks_run_after_stages_and_sink_gets_messages() {
        let messages = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink_messages = Arc::clone(&messages);
        let called = Rc::new(RefCell::new(0usize));
        let called_cb = Rc::clone(&called);

        let mut pipeline = StagePipeline::new()
            .with_sink(Arc::new(move |m: &str| {
                sink_messages.lock().unwrap().push(m.to_string())
            }))
            .stage("only", |_| Ok(StageResult::default()))
            .callback("count", move |history: &StageHistory| {
                assert_eq!(history.len(), 1);
                *called_cb.borrow_mut() += 1;
                Ok(())
            });

        pipeline.run().unwrap();
        assert_eq!(*called.borrow(), 1);

        let messages = messages.lock().unwrap();
        assert_eq!(messages[0], "only");
        assert!(messages[1].starts_with("only duration: "));
        assert!(messages[1].ends_with('s'));
        assert_eq!(messages[2], "Do callbacks");
        assert_eq!(messages[3], "count");
        assert!(messages[4].starts_with("count duration: "));
    }

    #[test]
    fn test_stage_error_aborts_run() {
        let reached = Rc::new(RefCell::new(false));
        let reached_cb = Rc::clone(&reached);

        let mut pipeline = StagePipeline::new()
            .stage("broken", |_| {
                Err(TransitionError::Failed {
                    stage: "broken".to_string(),
                    message: "boom".to_string(),
                }
                .into())
            })
            .callback("never", move |_: &StageHistory| {
                *reached_cb.borrow_mut() = true;
                Ok(())
            });

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, FileprocError::Transition(_)));
        assert!(!*reached.borrow());
    }

    #[test]
    fn test_duplicate_stage_replaces_in_place() {
        let pipeline = StagePipeline::new()
            .stage("a", |_| Ok(StageResult::default()))
            .stage("b", |_| Ok(StageResult::default()))
            .stage("a", |_| {
                Ok(StageResult::new(items(&["z"]), Vec::new(), ErrorMap::new()))
            });
        assert_eq!(pipeline.stage_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_require_unknown_stage() {
        let history = StageHistory::new();
        assert!(history.require("missing").is_err());
        assert!(history.is_empty());
    }
}
