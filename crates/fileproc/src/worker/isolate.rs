//! Per-task process isolation.
//!
//! Each task runs in a child process forked from the worker thread. The child
//! writes its `WorkResult` as a single JSON line into a private pipe and exits.
//! The parent supervises the child against `process_timeout` and escalates
//! SIGTERM -> SIGKILL when it hangs, so a crash or hang inside the
//! transformation costs one task, never the worker.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use log::{debug, warn};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};

use crate::pipeline::progress::SharedSink;

use super::task::{FileTask, WorkResult};
use super::transform::{apply_or_fail, Transform};

pub const NO_RESULT_REASON: &str = "Can't get result from queue";
pub const TERMINATED_REASON: &str = "Process was terminated after timeout";
pub const KILLED_REASON: &str = "Process was forcibly killed after timeout";
pub const CANCELLED_REASON: &str = "Process was killed during pool shutdown";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How the child for a single task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    /// The child reported a result before the deadline.
    Completed,
    /// The child exited (or crashed) without reporting.
    ExitedWithoutResult,
    /// The child outlived the deadline and stopped after SIGTERM.
    Terminated,
    /// The child ignored SIGTERM and was SIGKILLed.
    Killed,
    /// The pool shut down while the child was running.
    Cancelled,
    /// The child could not be forked at all.
    SpawnFailed,
}

/// A supervised run: the result that gets reported plus how the child ended.
#[derive(Debug, Clone)]
pub struct IsolatedRun {
    pub result: WorkResult,
    pub outcome: ChildOutcome,
}

#[derive(Clone)]
pub struct SafetyShim {
    transform: Arc<dyn Transform>,
    process_timeout: Duration,
    result_grace: Duration,
    silence_child: bool,
    stop: Arc<AtomicBool>,
    sink: SharedSink,
}

impl SafetyShim {
    pub fn new(
        transform: Arc<dyn Transform>,
        process_timeout: Duration,
        result_grace: Duration,
        sink: SharedSink,
    ) -> Self {
        Self {
            transform,
            process_timeout,
            result_grace,
            silence_child: false,
            stop: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    /// Redirect the child's stdout/stderr to /dev/null.
    pub fn with_silenced_child(mut self, silence: bool) -> Self {
        self.silence_child = silence;
        self
    }

    /// Share a stop flag; once raised, running children are killed.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Run one task in a disposable child. Always yields exactly one result.
    pub fn run(&self, task: &FileTask) -> WorkResult {
        self.run_detailed(task).result
    }

    pub fn run_detailed(&self, task: &FileTask) -> IsolatedRun {
        match self.spawn(task) {
            Ok(child) => self.supervise(task, child),
            Err(e) => {
                let message = format!("Error handling process: {}", e);
                self.sink.emit(&message);
                IsolatedRun {
                    result: WorkResult::failure(task, message),
                    outcome: ChildOutcome::SpawnFailed,
                }
            }
        }
    }

    fn spawn(&self, task: &FileTask) -> nix::Result<Child> {
        let (read_fd, write_fd) = pipe()?;

        // SAFETY: the child only runs the transformation, writes to its pipe
        // and leaves through `_exit`, never returning into the worker loop.
        match unsafe { fork() }? {
            ForkResult::Child => {
                drop(read_fd);
                run_child(self.transform.as_ref(), task, write_fd, self.silence_child)
            }
            ForkResult::Parent { child } => {
                drop(write_fd);
                debug!("Forked child {} for {}", child, task.path.display());
                Ok(Child::new(child, spawn_reader(read_fd)))
            }
        }
    }

    fn supervise(&self, task: &FileTask, mut child: Child) -> IsolatedRun {
        match self.wait_for_result(&mut child) {
            Waited::Reported(result) => {
                self.finish(&mut child);
                IsolatedRun {
                    result,
                    outcome: ChildOutcome::Completed,
                }
            }
            Waited::Exited => match child.collect_result(self.result_grace) {
                Some(result) => IsolatedRun {
                    result,
                    outcome: ChildOutcome::Completed,
                },
                None => IsolatedRun {
                    result: WorkResult::failure(task, NO_RESULT_REASON),
                    outcome: ChildOutcome::ExitedWithoutResult,
                },
            },
            Waited::Stopped => {
                child.signal(Signal::SIGKILL);
                child.reap();
                self.failed(task, ChildOutcome::Cancelled, CANCELLED_REASON)
            }
            Waited::TimedOut => self.escalate(task, &mut child),
        }
    }

    fn escalate(&self, task: &FileTask, child: &mut Child) -> IsolatedRun {
        warn!(
            "Child {} for {} exceeded {:?}, terminating",
            child.pid,
            task.path.display(),
            self.process_timeout
        );
        child.signal(Signal::SIGTERM);
        if self.wait_for_exit(child, self.process_timeout) {
            return self.failed(task, ChildOutcome::Terminated, TERMINATED_REASON);
        }

        child.signal(Signal::SIGKILL);
        child.reap();
        if self.stop.load(Ordering::Relaxed) {
            return self.failed(task, ChildOutcome::Cancelled, CANCELLED_REASON);
        }
        self.sink.emit(KILLED_REASON);
        self.failed(task, ChildOutcome::Killed, KILLED_REASON)
    }

    fn failed(&self, task: &FileTask, outcome: ChildOutcome, step: &str) -> IsolatedRun {
        IsolatedRun {
            result: WorkResult::failure(task, format!("{} | {}", NO_RESULT_REASON, step)),
            outcome,
        }
    }

    fn wait_for_result(&self, child: &mut Child) -> Waited {
        let deadline = Instant::now() + self.process_timeout;
        loop {
            if let Some(result) = child.poll_result() {
                return Waited::Reported(result);
            }
            if child.has_exited() {
                return Waited::Exited;
            }
            if self.stop.load(Ordering::Relaxed) {
                return Waited::Stopped;
            }
            if Instant::now() >= deadline {
                return Waited::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_for_exit(&self, child: &mut Child, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if child.has_exited() {
                return true;
            }
            if self.stop.load(Ordering::Relaxed) || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// The child has reported; give it a moment to exit, then make sure.
    fn finish(&self, child: &mut Child) {
        if !self.wait_for_exit(child, self.result_grace) {
            child.signal(Signal::SIGKILL);
            child.reap();
        }
    }
}

enum Waited {
    Reported(WorkResult),
    Exited,
    TimedOut,
    Stopped,
}

struct Child {
    pid: Pid,
    receiver: Receiver<Option<WorkResult>>,
    channel_done: bool,
    reaped: bool,
}

impl Child {
    fn new(pid: Pid, receiver: Receiver<Option<WorkResult>>) -> Self {
        Self {
            pid,
            receiver,
            channel_done: false,
            reaped: false,
        }
    }

    fn poll_result(&mut self) -> Option<WorkResult> {
        if self.channel_done {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.channel_done = true;
                result
            }
            Err(_) => None,
        }
    }

    fn collect_result(&mut self, grace: Duration) -> Option<WorkResult> {
        if self.channel_done {
            return None;
        }
        match self.receiver.recv_timeout(grace) {
            Ok(result) => {
                self.channel_done = true;
                result
            }
            Err(_) => None,
        }
    }

    fn has_exited(&mut self) -> bool {
        if self.reaped {
            return true;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => false,
            Ok(status) => {
                debug!("Child {} finished: {:?}", self.pid, status);
                self.reaped = true;
                true
            }
            Err(e) => {
                debug!("waitpid({}) failed: {}", self.pid, e);
                self.reaped = true;
                true
            }
        }
    }

    fn signal(&self, signal: Signal) {
        if self.reaped {
            return;
        }
        if let Err(e) = kill(self.pid, signal) {
            debug!("Failed to send {:?} to {}: {}", signal, self.pid, e);
        }
    }

    fn reap(&mut self) {
        if !self.reaped {
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}

/// Reads the child's single result line off the pipe. The write end can be
/// inherited by sibling forks, so EOF may arrive late; the supervisor never
/// waits on this thread without a deadline.
fn spawn_reader(read_fd: OwnedFd) -> Receiver<Option<WorkResult>> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut reader = BufReader::new(File::from(read_fd));
        let mut line = String::new();
        let decoded = match reader.read_line(&mut line) {
            Ok(n) if n > 0 => serde_json::from_str::<WorkResult>(line.trim_end()).ok(),
            _ => None,
        };
        let _ = tx.send(decoded);
    });
    rx
}

fn run_child(
    transform: &dyn Transform,
    task: &FileTask,
    write_fd: OwnedFd,
    silence: bool,
) -> ! {
    if silence {
        silence_output();
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| apply_or_fail(transform, task)));
    let code = match outcome {
        Ok(result) => {
            let mut channel = File::from(write_fd);
            match serde_json::to_string(&result) {
                Ok(line) if writeln!(channel, "{}", line).is_ok() => 0,
                _ => 2,
            }
        }
        Err(_) => 101,
    };

    // SAFETY: `_exit` skips destructors and atexit handlers inherited from
    // the parent, which must not run twice.
    unsafe { libc::_exit(code) }
}

fn silence_output() {
    if let Ok(devnull) = std::fs::OpenOptions::new().write(true).open("/dev/null") {
        let fd = devnull.as_raw_fd();
        // SAFETY: dup2 onto the standard descriptors of this process only.
        unsafe {
            libc::dup2(fd, libc::STDOUT_FILENO);
            libc::dup2(fd, libc::STDERR_FILENO);
        }
    }
}
