//! Isolated environment for engine runs.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use fileproc::pipeline::NoopProgress;
use fileproc::{DiagnosticsSink, Item, Metadata, ProcessOptions, Processor, Timeouts};

/// Collects every diagnostics message.
#[derive(Default, Clone)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

impl DiagnosticsSink for RecordingSink {
    fn emit(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sink: RecordingSink,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        let output_dir = temp_dir.path().join("output");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            input_dir,
            output_dir,
            sink: RecordingSink::new(),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `file_<i>.<ext>` for i in 0..count, content being the index.
    pub fn write_inputs(&self, count: usize, ext: &str) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = self.input_dir.join(format!("file_{}.{}", i, ext));
                std::fs::write(&path, i.to_string()).expect("Failed to write input file");
                path
            })
            .collect()
    }

    pub fn items(paths: &[PathBuf]) -> Vec<Item> {
        paths.iter().map(|p| (p.clone(), Metadata::new())).collect()
    }

    /// Options with timeouts short enough for tests.
    pub fn options(description: &str) -> ProcessOptions {
        ProcessOptions::new(description).timeouts(Timeouts {
            task: Duration::from_millis(500),
            process: Duration::from_secs(5),
            result_poll: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(2),
            result_grace: Duration::from_millis(500),
        })
    }

    /// A processor without a progress bar that reports into `self.sink`.
    pub fn processor(&self, options: ProcessOptions) -> Processor {
        Processor::new(options)
            .with_progress(Arc::new(NoopProgress))
            .with_sink(Arc::new(self.sink.clone()))
    }
}
