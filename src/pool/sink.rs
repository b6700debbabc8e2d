//! Coordinator-side destinations for worker output.

use std::io::Write;
use std::sync::Mutex;

/// Receives what workers report while they run.
///
/// Sinks are called from waiter threads and, for `task_dispatched`, while the
/// pool's state lock is held. They must not call back into the pool.
pub trait OutputSink: Send + Sync {
    /// A `PRINT` line from the worker in `slot`.
    fn print(&self, slot: usize, line: &str);

    /// `task` was handed to the worker in `slot`.
    fn task_dispatched(&self, _slot: usize, _task: &str) {}

    /// The worker in `slot` reported `STATE: IDLE`.
    fn task_complete(&self, _slot: usize) {}
}

/// Writes worker lines and completion notices to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn print(&self, _slot: usize, line: &str) {
        let _ = writeln!(std::io::stdout().lock(), "{}", line);
    }

    fn task_complete(&self, _slot: usize) {
        let _ = writeln!(std::io::stdout().lock(), "Task complete!");
    }
}

/// One thing a [`MemorySink`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Print { slot: usize, line: String },
    Dispatched { slot: usize, task: String },
    Complete { slot: usize },
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SinkEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Printed lines, without slot information.
    pub fn lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Print { line, .. } => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Tasks in the order they were dispatched, with their slots.
    pub fn dispatched(&self) -> Vec<(usize, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Dispatched { slot, task } => Some((slot, task)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl OutputSink for MemorySink {
    fn print(&self, slot: usize, line: &str) {
        self.push(SinkEvent::Print {
            slot,
            line: line.to_string(),
        });
    }

    fn task_dispatched(&self, slot: usize, task: &str) {
        self.push(SinkEvent::Dispatched {
            slot,
            task: task.to_string(),
        });
    }

    fn task_complete(&self, slot: usize) {
        self.push(SinkEvent::Complete { slot });
    }
}
