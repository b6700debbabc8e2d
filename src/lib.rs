//! procpool - run named jobs in a pool of isolated worker processes.
//!
//! The same executable plays both roles. Check [`is_worker_process`] first
//! thing in `main`; workers hand control to [`run_worker_main`], everyone
//! else builds a [`ProcessPool`].
//!
//! ```no_run
//! use procpool::{JobRegistry, PoolConfig, ProcessPool, is_worker_process, run_worker_main};
//!
//! fn jobs() -> JobRegistry {
//!     JobRegistry::new().with_job("echo", |args, out| {
//!         out.print(args.join(" "));
//!         0
//!     })
//! }
//!
//! fn main() -> procpool::Result<()> {
//!     if is_worker_process(std::env::args_os()) {
//!         run_worker_main(&jobs());
//!     }
//!     let pool = ProcessPool::new(PoolConfig::default().with_workers(2))?;
//!     pool.schedule("echo hello");
//!     pool.schedule("echo world");
//!     pool.wait_idle()
//! }
//! ```

pub mod error;
pub mod logging;
pub mod pool;

pub use error::{PoolError, Result};
pub use pool::{
    FailurePolicy, JobOutput, JobRegistry, Message, OutputSink, PoolConfig, PoolStats,
    ProcessPool, StdoutSink, TerminationReason, WorkerCommand, WorkerFailure, is_worker_process,
    run_worker_main,
};
