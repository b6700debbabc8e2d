//! Coordinator side of the pool: task queue, slots and dispatch.
//!
//! All queue and slot state sits behind one mutex shared with the waiter
//! threads. Nothing that holds the mutex ever blocks on a worker's reply;
//! spawning, handshakes and reaping happen with the lock released.

use super::ipc::FrameReader;
use super::proc::Proc;
use super::signals::{TerminationReason, WorkerFailure};
use super::sink::{OutputSink, StdoutSink};
use super::slot::{Slot, SlotState};
use super::spawn::{WorkerCommand, spawn_waiter_thread, spawn_worker};
use crate::error::{PoolError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// How long to wait for a dead worker's exit status before killing it.
const DEFAULT_REAP_GRACE: Duration = Duration::from_millis(500);

/// What the pool does when a worker process dies or its channel breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Replace the worker with a fresh process.
    #[default]
    Respawn,
    /// Leave the slot empty for the rest of the pool's life.
    Retire,
    /// Retire the slot and report the failure from `wait_idle`.
    Escalate,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Respawn => "respawn",
            Self::Retire => "retire",
            Self::Escalate => "escalate",
        };
        f.write_str(name)
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "respawn" => Ok(Self::Respawn),
            "retire" => Ok(Self::Retire),
            "escalate" => Ok(Self::Escalate),
            other => Err(format!(
                "unknown failure policy '{}' (expected respawn, retire or escalate)",
                other
            )),
        }
    }
}

/// Configuration for a [`ProcessPool`].
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of worker processes to start with.
    pub worker_count: usize,
    /// How to launch a worker.
    pub command: WorkerCommand,
    pub failure_policy: FailurePolicy,
    /// Where worker output and completion notices go.
    pub sink: Arc<dyn OutputSink>,
    /// How long to wait for a dead worker's exit status.
    pub reap_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            command: WorkerCommand::default(),
            failure_policy: FailurePolicy::default(),
            sink: Arc::new(StdoutSink),
            reap_grace: DEFAULT_REAP_GRACE,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("worker_count", &self.worker_count)
            .field("command", &self.command)
            .field("failure_policy", &self.failure_policy)
            .field("reap_grace", &self.reap_grace)
            .finish_non_exhaustive()
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_command(mut self, command: WorkerCommand) -> Self {
        self.command = command;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_reap_grace(mut self, grace: Duration) -> Self {
        self.reap_grace = grace;
        self
    }
}

/// Outcome of one dispatch attempt. Neither non-dispatch outcome is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Dispatched(usize),
    QueueEmpty,
    NoIdleWorker,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total slots, whatever their state.
    pub workers: usize,
    pub idle: usize,
    pub busy: usize,
    pub respawning: usize,
    pub retired: usize,
    /// Tasks waiting for a worker.
    pub queued: usize,
    pub tasks_dispatched: u64,
    pub tasks_completed: u64,
    /// Tasks dropped because they could not be framed (e.g. contain NUL).
    pub tasks_rejected: u64,
    pub worker_failures: u64,
    pub respawns: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: u64,
    completed: u64,
    rejected: u64,
    failures: u64,
    respawns: u64,
}

#[derive(Default)]
pub(crate) struct PoolState {
    slots: Vec<Slot>,
    queue: VecDeque<String>,
    failures: Vec<WorkerFailure>,
    /// First failure under `FailurePolicy::Escalate`, until `wait_idle` reports it.
    escalated: Option<WorkerFailure>,
    counters: Counters,
}

impl PoolState {
    fn position(&self, slot_id: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.id == slot_id)
    }

    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.slots.len(),
            idle: self.count(SlotState::Idle),
            busy: self.count(SlotState::Busy),
            respawning: self.count(SlotState::Respawning),
            retired: self.count(SlotState::Retired),
            queued: self.queue.len(),
            tasks_dispatched: self.counters.dispatched,
            tasks_completed: self.counters.completed,
            tasks_rejected: self.counters.rejected,
            worker_failures: self.counters.failures,
            respawns: self.counters.respawns,
        }
    }

    fn record_failure(&mut self, failure: WorkerFailure, policy: FailurePolicy) {
        self.counters.failures += 1;
        if policy == FailurePolicy::Escalate && self.escalated.is_none() {
            self.escalated = Some(failure.clone());
        }
        self.failures.push(failure);
    }

    /// `Some` once `wait_idle` has an answer.
    fn idle_outcome(&mut self) -> Option<Result<()>> {
        if let Some(failure) = self.escalated.take() {
            return Some(Err(PoolError::Escalated(failure)));
        }

        let in_flight = self
            .slots
            .iter()
            .any(|s| matches!(s.state, SlotState::Busy | SlotState::Respawning));
        if self.queue.is_empty() && !in_flight {
            return Some(Ok(()));
        }

        let can_run = self.slots.iter().any(|s| s.state != SlotState::Retired);
        if !self.queue.is_empty() && !can_run {
            return Some(Err(PoolError::NoLiveWorkers {
                queued: self.queue.len(),
            }));
        }
        None
    }
}

/// Index of the lowest-numbered idle slot.
fn first_idle(slots: &[Slot]) -> Option<usize> {
    slots.iter().position(Slot::is_idle)
}

/// State shared between the pool handle and its waiter threads.
pub(crate) struct Shared {
    state: Mutex<PoolState>,
    changed: Condvar,
    config: PoolConfig,
    next_slot_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn sink(&self) -> &dyn OutputSink {
        self.config.sink.as_ref()
    }

    fn new_slot(&self, proc: Proc) -> Slot {
        Slot::new(self.next_slot_id.fetch_add(1, Ordering::Relaxed), proc)
    }

    /// Hand the front task to the lowest idle slot.
    ///
    /// A slot whose worker cannot take the task goes through the failure path
    /// and the scan moves on; the task stays at the front of the queue. A task
    /// that cannot be framed is dropped without touching the worker.
    fn dispatch(self: &Arc<Self>, state: &mut PoolState) -> Dispatch {
        loop {
            let Some(task) = state.queue.front() else {
                return Dispatch::QueueEmpty;
            };
            let Some(index) = first_idle(&state.slots) else {
                return Dispatch::NoIdleWorker;
            };

            match state.slots[index].start(index, task, self) {
                Ok(()) => {
                    self.config.sink.task_dispatched(index, task);
                    state.queue.pop_front();
                    state.counters.dispatched += 1;
                    return Dispatch::Dispatched(index);
                }
                // Nothing was written, the worker is fine; drop the task instead
                Err(e @ PoolError::MalformedMessage(_)) => {
                    warn!(slot = index, task = ?task, error = %e, "Rejecting task that cannot be framed");
                    state.queue.pop_front();
                    state.counters.rejected += 1;
                }
                Err(e) => {
                    warn!(slot = index, error = %e, "Could not hand task to worker");
                    self.fail_locked(state, index, e);
                }
            }
        }
    }

    /// Dispatch until the queue is empty or no slot is idle.
    fn dispatch_pending(self: &Arc<Self>, state: &mut PoolState) {
        while let Dispatch::Dispatched(_) = self.dispatch(state) {}
    }

    fn notify_task_complete(self: &Arc<Self>, state: &mut PoolState) {
        let outcome = self.dispatch(state);
        debug!(?outcome, queued = state.queue.len(), "Dispatch after completion");
    }

    /// Called by a waiter once its worker reported idle.
    pub(crate) fn complete(self: &Arc<Self>, slot_id: u64, reader: FrameReader) {
        let mut state = self.lock();
        let Some(index) = state.position(slot_id) else {
            debug!(slot_id, "Slot was removed while busy; dropping its channel");
            return;
        };

        let slot = &mut state.slots[index];
        if let Some(proc) = slot.proc.as_mut() {
            proc.restore_reader(reader);
        }
        slot.state = SlotState::Idle;
        let task = slot.task.take();
        state.counters.completed += 1;
        debug!(slot = index, task = ?task, "Task complete");

        self.notify_task_complete(&mut state);
        self.changed.notify_all();
    }

    /// Called by a waiter whose worker stopped answering.
    pub(crate) fn fail(self: &Arc<Self>, slot_id: u64, error: PoolError) {
        let detached = {
            let mut state = self.lock();
            let Some(index) = state.position(slot_id) else {
                debug!(slot_id, error = %error, "Removed slot's worker went away");
                return;
            };
            let detached = self.detach(&mut state, index);
            self.changed.notify_all();
            detached
        };
        self.handle_failure(slot_id, detached, error);
    }

    /// Failure path for a slot found broken while the lock is already held.
    fn fail_locked(self: &Arc<Self>, state: &mut PoolState, index: usize, error: PoolError) {
        let slot_id = state.slots[index].id;
        let detached = self.detach(state, index);
        self.changed.notify_all();

        let shared = Arc::clone(self);
        let name = format!("procpool-reaper-{}", index);
        if let Err(e) = spawn_waiter_thread(name, move || {
            shared.handle_failure(slot_id, detached, error)
        }) {
            // The closure and the process it owned are gone; retire the slot
            warn!(slot = index, error = %e, "Cannot start reaper thread");
            state.slots[index].state = SlotState::Retired;
        }
    }

    /// Take the slot's process and task out and mark it per policy.
    fn detach(&self, state: &mut PoolState, index: usize) -> Detached {
        let slot = &mut state.slots[index];
        slot.state = match self.config.failure_policy {
            FailurePolicy::Respawn => SlotState::Respawning,
            FailurePolicy::Retire | FailurePolicy::Escalate => SlotState::Retired,
        };
        Detached {
            index,
            proc: slot.proc.take(),
            task: slot.task.take(),
        }
    }

    /// Classify and record a failure, then respawn if the policy says so.
    /// Runs without the lock.
    fn handle_failure(self: &Arc<Self>, slot_id: u64, detached: Detached, error: PoolError) {
        let Detached { index, proc, task } = detached;
        let policy = self.config.failure_policy;

        let reason = match proc {
            Some(mut proc) => proc.reap(self.config.reap_grace),
            None => TerminationReason::Unknown,
        };

        let mut failure = WorkerFailure::new(index, reason).with_message(error.to_string());
        if let Some(task) = task {
            failure = failure.with_task(task);
        }
        warn!(
            slot = index,
            reason = %failure.reason,
            task = ?failure.task,
            %policy,
            "Worker failed"
        );

        {
            let mut state = self.lock();
            state.record_failure(failure, policy);
            self.changed.notify_all();
        }

        if policy == FailurePolicy::Respawn {
            self.respawn(slot_id, index);
        }
    }

    fn respawn(self: &Arc<Self>, slot_id: u64, index: usize) {
        let spawned = spawn_worker(&self.config.command);

        let mut state = self.lock();
        let Some(position) = state.position(slot_id) else {
            debug!(slot = index, "Slot removed during respawn; discarding replacement");
            return;
        };

        match spawned {
            Ok(proc) => {
                info!(slot = position, pid = proc.pid().as_raw(), "Worker respawned");
                let slot = &mut state.slots[position];
                slot.proc = Some(proc);
                slot.state = SlotState::Idle;
                state.counters.respawns += 1;
                self.dispatch_pending(&mut state);
            }
            Err(e) => {
                warn!(slot = position, error = %e, "Respawn failed; retiring slot");
                state.slots[position].state = SlotState::Retired;
                let failure = WorkerFailure::new(position, TerminationReason::Unknown)
                    .with_message(format!("respawn failed: {}", e));
                state.record_failure(failure, self.config.failure_policy);
            }
        }
        self.changed.notify_all();
    }
}

/// A slot's remains after its worker failed.
struct Detached {
    index: usize,
    proc: Option<Proc>,
    task: Option<String>,
}

/// Pool of worker processes fed from a FIFO task queue.
///
/// Tasks are strings of the form `job-name [args]`, executed by whichever
/// registered job the workers know under that name. Each idle worker takes
/// the oldest queued task; the lowest-numbered idle worker goes first.
///
/// Dropping the pool kills every worker, busy or not.
pub struct ProcessPool {
    shared: Arc<Shared>,
    /// Serialises resizes so slot counts are stable while spawning.
    resize_lock: Mutex<()>,
}

impl ProcessPool {
    /// Start a pool with `config.worker_count` workers.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let worker_count = config.worker_count;
        info!(
            workers = worker_count,
            policy = %config.failure_policy,
            "Starting process pool"
        );

        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                changed: Condvar::new(),
                config,
                next_slot_id: AtomicU64::new(0),
            }),
            resize_lock: Mutex::new(()),
        };
        pool.resize(worker_count)?;
        Ok(pool)
    }

    /// Grow or shrink the pool to exactly `size` slots.
    ///
    /// Shrinking kills the trailing workers at once, even mid-task; their
    /// tasks are lost. Growing spawns every new worker before installing any
    /// of them, so a spawn failure leaves the pool as it was. Queued tasks
    /// survive either way.
    #[instrument(level = "debug", skip(self))]
    pub fn resize(&self, size: usize) -> Result<()> {
        let _resizing = self
            .resize_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = self.shared.lock().slots.len();

        if size < current {
            let removed = {
                let mut state = self.shared.lock();
                let removed = state.slots.split_off(size);
                self.shared.changed.notify_all();
                removed
            };
            for (offset, slot) in removed.iter().enumerate() {
                if let Some(task) = &slot.task {
                    warn!(slot = size + offset, task = %task, "Terminating busy worker");
                }
            }
            // Killing and reaping happen here, outside the state lock
            drop(removed);
            info!(from = current, to = size, "Pool shrunk");
        } else if size > current {
            let mut spawned = Vec::with_capacity(size - current);
            for index in current..size {
                let proc = spawn_worker(&self.shared.config.command).inspect_err(|e| {
                    warn!(slot = index, error = %e, "Failed to start worker");
                })?;
                spawned.push(proc);
            }

            let mut state = self.shared.lock();
            for proc in spawned {
                let slot = self.shared.new_slot(proc);
                state.slots.push(slot);
            }
            self.shared.dispatch_pending(&mut state);
            self.shared.changed.notify_all();
            info!(from = current, to = size, "Pool grown");
        }
        Ok(())
    }

    /// Queue `task` and dispatch it if a worker is idle.
    ///
    /// A task that cannot be framed (it contains a NUL byte) is dropped when
    /// it reaches the front of the queue and counted in
    /// [`PoolStats::tasks_rejected`].
    pub fn schedule(&self, task: impl Into<String>) {
        let task = task.into();
        let mut state = self.shared.lock();
        state.queue.push_back(task);
        match self.shared.dispatch(&mut state) {
            Dispatch::Dispatched(slot) => debug!(slot, "Task started immediately"),
            Dispatch::NoIdleWorker => debug!(queued = state.queue.len(), "All workers busy"),
            Dispatch::QueueEmpty => {}
        }
        self.shared.changed.notify_all();
    }

    /// Number of slots, including retired ones.
    pub fn size(&self) -> usize {
        self.shared.lock().slots.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats()
    }

    /// PID of each slot's worker, in slot order. `None` while a slot has no
    /// process.
    pub fn worker_pids(&self) -> Vec<Option<u32>> {
        self.shared.lock().slots.iter().map(Slot::pid).collect()
    }

    /// Drain the worker failures recorded so far.
    pub fn take_failures(&self) -> Vec<WorkerFailure> {
        std::mem::take(&mut self.shared.lock().failures)
    }

    /// Block until every queued task has run and no worker is busy.
    ///
    /// Fails with [`PoolError::Escalated`] after a failure under
    /// [`FailurePolicy::Escalate`], or [`PoolError::NoLiveWorkers`] when tasks
    /// are queued but no slot can ever take them.
    pub fn wait_idle(&self) -> Result<()> {
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = state.idle_outcome() {
                return outcome;
            }
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// [`wait_idle`](Self::wait_idle) with a deadline.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = state.idle_outcome() {
                return outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout(timeout));
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        let _ = self.resize(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("respawn".parse::<FailurePolicy>(), Ok(FailurePolicy::Respawn));
        assert_eq!("Retire".parse::<FailurePolicy>(), Ok(FailurePolicy::Retire));
        assert_eq!("ESCALATE".parse::<FailurePolicy>(), Ok(FailurePolicy::Escalate));
        assert!("ignore".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_failure_policy_display_round_trips() {
        for policy in [
            FailurePolicy::Respawn,
            FailurePolicy::Retire,
            FailurePolicy::Escalate,
        ] {
            assert_eq!(policy.to_string().parse::<FailurePolicy>(), Ok(policy));
        }
        assert_eq!(FailurePolicy::default(), FailurePolicy::Respawn);
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.worker_count >= 1);
        assert!(config.command.program.is_none());
        assert_eq!(config.failure_policy, FailurePolicy::Respawn);
        assert_eq!(config.reap_grace, DEFAULT_REAP_GRACE);
    }

    #[test]
    fn test_config_builders() {
        let config = PoolConfig::default()
            .with_workers(3)
            .with_failure_policy(FailurePolicy::Retire)
            .with_command(WorkerCommand::new("/bin/worker"))
            .with_reap_grace(Duration::from_millis(20));
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.reap_grace, Duration::from_millis(20));
        assert_eq!(config.failure_policy, FailurePolicy::Retire);
        assert!(format!("{:?}", config).contains("worker_count: 3"));
    }

    #[test]
    fn test_empty_state_is_idle() {
        let mut state = PoolState::default();
        assert!(matches!(state.idle_outcome(), Some(Ok(()))));
        assert_eq!(state.stats(), PoolStats::default());
    }

    #[test]
    fn test_queued_tasks_without_slots() {
        let mut state = PoolState::default();
        state.queue.push_back("echo hi".into());
        assert!(matches!(
            state.idle_outcome(),
            Some(Err(PoolError::NoLiveWorkers { queued: 1 }))
        ));
        assert_eq!(state.stats().queued, 1);
    }

    #[test]
    fn test_escalated_failure_reported_once() {
        let mut state = PoolState::default();
        let failure = WorkerFailure::new(0, TerminationReason::Exited(1));
        state.record_failure(failure.clone(), FailurePolicy::Escalate);
        state.record_failure(
            WorkerFailure::new(1, TerminationReason::Exited(2)),
            FailurePolicy::Escalate,
        );

        match state.idle_outcome() {
            Some(Err(PoolError::Escalated(f))) => assert_eq!(f, failure),
            other => panic!("expected escalation, got {:?}", other),
        }
        assert!(matches!(state.idle_outcome(), Some(Ok(()))));
        assert_eq!(state.failures.len(), 2);
        assert_eq!(state.stats().worker_failures, 2);
    }

    #[test]
    fn test_retire_policy_does_not_escalate() {
        let mut state = PoolState::default();
        state.record_failure(
            WorkerFailure::new(0, TerminationReason::Aborted),
            FailurePolicy::Retire,
        );
        assert!(state.escalated.is_none());
        assert_eq!(state.failures.len(), 1);
    }
}
