//! Crash analysis for worker processes.
//!
//! Turns a reaped child's wait status into a [`TerminationReason`] and bundles
//! it with the slot and task that were affected.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::fmt;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by a signal not covered below.
    Signaled(Signal),
    /// SIGKILL from outside the pool, most likely the OOM killer.
    OutOfMemory,
    /// SIGABRT, e.g. a panic with `panic = "abort"` or `std::process::abort`.
    Aborted,
    /// SIGSEGV/SIGBUS, usually a stack overflow.
    StackOverflow,
    /// Process had not exited when we looked.
    StillAlive,
    /// Status could not be determined.
    Unknown,
}

impl TerminationReason {
    /// Whether the worker exited on its own with status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::OutOfMemory => "killed by SIGKILL (possibly out of memory)".to_string(),
            Self::Aborted => "aborted (SIGABRT)".to_string(),
            Self::StackOverflow => "crashed (SIGSEGV/SIGBUS)".to_string(),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => match signal {
            Signal::SIGKILL => TerminationReason::OutOfMemory,
            Signal::SIGABRT => TerminationReason::Aborted,
            Signal::SIGSEGV | Signal::SIGBUS => TerminationReason::StackOverflow,
            _ => TerminationReason::Signaled(signal),
        },
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}

/// A worker that stopped answering, as recorded by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    /// Slot position the worker occupied.
    pub slot: usize,
    /// Why the worker process went away.
    pub reason: TerminationReason,
    /// Task that was running, if any. It is not re-queued.
    pub task: Option<String>,
    /// Channel or spawn error that exposed the failure.
    pub message: Option<String>,
}

impl WorkerFailure {
    pub fn new(slot: usize, reason: TerminationReason) -> Self {
        Self {
            slot,
            reason,
            task: None,
            message: None,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker {} {}", self.slot, self.reason)?;
        if let Some(task) = &self.task {
            write!(f, " while running {:?}", task)?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}
