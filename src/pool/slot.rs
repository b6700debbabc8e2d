//! Worker slots and their completion waiters.
//!
//! A slot owns one worker process. Starting a task lends the process's
//! inbound channel to a waiter thread, which hands it back when the worker
//! reports `STATE: IDLE`.

use super::ipc::FrameReader;
use super::proc::Proc;
use super::protocol::{Message, PRINT};
use super::scheduler::Shared;
use super::spawn::spawn_waiter_thread;
use crate::error::{PoolError, Result};
use std::sync::Arc;
use tracing::{debug, trace};

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Live worker, no task.
    Idle,
    /// Live worker running a task; a waiter is pending.
    Busy,
    /// Worker died; a replacement is being spawned.
    Respawning,
    /// Worker died and will not be replaced.
    Retired,
}

pub(crate) struct Slot {
    /// Unique for the pool's lifetime, unlike the slot's index.
    pub(crate) id: u64,
    pub(crate) state: SlotState,
    pub(crate) proc: Option<Proc>,
    /// Task currently running, kept for failure reports.
    pub(crate) task: Option<String>,
}

impl Slot {
    pub(crate) fn new(id: u64, proc: Proc) -> Self {
        Self {
            id,
            state: SlotState::Idle,
            proc: Some(proc),
            task: None,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == SlotState::Idle
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.proc.as_ref().map(|p| p.pid().as_raw() as u32)
    }

    /// Send `task` to the worker and start waiting for it to finish.
    ///
    /// On error the slot is left as it was and the caller still owns the task.
    pub(crate) fn start(&mut self, index: usize, task: &str, shared: &Arc<Shared>) -> Result<()> {
        let proc = self
            .proc
            .as_mut()
            .ok_or_else(|| PoolError::ChannelBroken(format!("slot {} has no worker", index)))?;

        proc.send(&Message::task(task))?;
        let reader = proc.take_reader().ok_or_else(|| {
            PoolError::ChannelBroken(format!("slot {} channel is already lent out", index))
        })?;

        let waiter_shared = Arc::clone(shared);
        let slot_id = self.id;
        spawn_waiter_thread(format!("procpool-slot-{}", index), move || {
            wait_for_completion(waiter_shared, slot_id, index, reader)
        })?;

        self.state = SlotState::Busy;
        self.task = Some(task.to_string());
        debug!(slot = index, pid = ?self.pid(), task, "Task dispatched");
        Ok(())
    }
}

/// Waiter body: forward output until the worker reports idle.
fn wait_for_completion(shared: Arc<Shared>, slot_id: u64, index: usize, mut reader: FrameReader) {
    let sink = shared.sink();

    let outcome = loop {
        match reader.recv() {
            Ok(Some(msg)) if msg.is_idle() => break Ok(()),
            Ok(Some(msg)) if msg.tag() == PRINT => sink.print(index, msg.body()),
            Ok(Some(msg)) => trace!(slot = index, tag = msg.tag(), "Skipping message"),
            Ok(None) => {
                break Err(PoolError::ChannelBroken(
                    "worker closed its output".to_string(),
                ));
            }
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Ok(()) => {
            sink.task_complete(index);
            shared.complete(slot_id, reader);
        }
        Err(e) => {
            drop(reader);
            shared.fail(slot_id, e);
        }
    }
}
