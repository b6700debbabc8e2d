//! Process-based worker pool.
//!
//! A coordinator feeds a FIFO queue of task strings to a fixed set of worker
//! processes. Every worker is the same executable started in worker mode, so
//! both sides agree on which jobs exist.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────┐
//!    schedule() ────▶ │   ProcessPool    │ ◀──── waiter threads
//!                     │  queue + slots   │       (one per busy slot)
//!                     └────────┬─────────┘
//!                              │  TASK: <job> <args>
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 0  │  │ Worker 1  │  │ Worker N  │
//!         │ (process) │  │ (process) │  │ (process) │
//!         │ registry  │  │ registry  │  │ registry  │
//!         └───────────┘  └───────────┘  └───────────┘
//!            PRINT / NULL / STATE: IDLE flow back up
//! ```
//!
//! # Features
//!
//! - **Process isolation**: a crashing job takes down only its worker
//! - **Lowest-slot dispatch**: the oldest task goes to the lowest idle slot
//! - **Live resizing**: grow or shrink while tasks run
//! - **Failure policy**: respawn, retire or escalate dead workers

mod ipc;
mod proc;
mod protocol;
mod registry;
mod scheduler;
mod signals;
mod sink;
mod slot;
mod spawn;
mod worker_main;

pub use ipc::{FrameReader, FrameWriter, MessageWriter, PipeFd};
pub use protocol::Message;
pub use registry::{JobFn, JobOutput, JobRegistry, split_task, tokenize_args};
pub use scheduler::{FailurePolicy, PoolConfig, PoolStats, ProcessPool};
pub use signals::{TerminationReason, WorkerFailure};
pub use sink::{MemorySink, OutputSink, SinkEvent, StdoutSink};
pub use slot::SlotState;
pub use spawn::WorkerCommand;
pub use worker_main::{WORKER_FLAG, is_worker_process, run_worker_main, worker_loop};

/// Wire-level constants.
pub mod wire {
    pub use super::protocol::{
        ACK, DIVIDER, HANDSHAKE_BODY, HANDSHAKE_TAG, IDLE, PRINT, STATE, TASK, TERMINATOR,
    };
}
