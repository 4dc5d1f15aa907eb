use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{msg}: {percent:>3}%|{bar:40.cyan/blue}| {pos}/{len} [{elapsed_precise}<{eta_precise}]";

/// Events emitted while a result set is being drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { description: String, total: u64 },
    Advanced { completed: u64 },
    Finished { completed: u64, total: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and quiet runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Terminal progress bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏ ");
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { description, total } => {
                self.bar.reset();
                self.bar.set_length(total);
                self.bar.set_message(description);
            }
            ProgressEvent::Advanced { completed } => {
                self.bar.set_position(completed);
            }
            ProgressEvent::Finished { completed, .. } => {
                self.bar.set_position(completed);
                self.bar.finish();
            }
        }
    }
}

/// Receives human readable stage, duration and error strings.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, message: &str);
}

impl<F> DiagnosticsSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, message: &str) {
        self(message)
    }
}

pub type SharedSink = Arc<dyn DiagnosticsSink>;

/// Drops every message.
pub struct NoopSink;

impl DiagnosticsSink for NoopSink {
    fn emit(&self, _message: &str) {}
}

/// Forwards messages to the `tracing` subscriber at info level.
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, message: &str) {
        tracing::info!(target: "fileproc::diagnostics", "{}", message);
    }
}
