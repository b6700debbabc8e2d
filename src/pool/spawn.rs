//! Worker subprocess spawning.
//!
//! Uses `posix_spawn` via `std::process::Command`, wiring the child's stdin
//! and stdout to the pool and leaving its stderr on ours for worker logs.

use super::proc::Proc;
use super::protocol::Message;
use super::worker_main::WORKER_FLAG;
use crate::error::{PoolError, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// How to launch a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Program to run. `None` means the current executable.
    pub program: Option<PathBuf>,
    /// Arguments placed before the worker sentinel.
    pub args: Vec<OsString>,
    /// Extra environment for the worker.
    pub envs: Vec<(OsString, OsString)>,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::current_exe()
    }
}

impl WorkerCommand {
    /// Re-run the current executable in worker mode.
    pub fn current_exe() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Run `program` in worker mode.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
            ..Self::current_exe()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe()
                .map_err(|e| PoolError::Spawn(format!("cannot locate current executable: {}", e))),
        }
    }
}

/// Spawn a worker subprocess and wait for its handshake.
///
/// The returned `Proc` has consumed exactly one message, the handshake, and
/// is ready for a `TASK`.
pub fn spawn_worker(command: &WorkerCommand) -> Result<Proc> {
    let program = command.resolve_program()?;

    let mut cmd = Command::new(&program);
    cmd.args(&command.args);
    cmd.arg(WORKER_FLAG);
    cmd.envs(command.envs.iter().map(|(k, v)| (k, v)));

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());

    let child = cmd
        .spawn()
        .map_err(|e| PoolError::Spawn(format!("{}: {}", program.display(), e)))?;

    let mut proc = Proc::from_child(child)?;
    match proc.recv() {
        Ok(msg) if msg == Message::handshake() => {
            debug!(pid = proc.pid().as_raw(), program = %program.display(), "Worker ready");
            Ok(proc)
        }
        Ok(other) => Err(PoolError::Handshake(format!(
            "expected {:?}, got {:?}",
            Message::handshake().to_string(),
            other.to_string()
        ))),
        Err(e) => Err(PoolError::Handshake(e.to_string())),
    }
}

/// Spawn a named thread for a completion waiter.
pub fn spawn_waiter_thread<F>(name: String, f: F) -> Result<std::thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|e| PoolError::Spawn(format!("cannot start waiter thread: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_command_builder() {
        let cmd = WorkerCommand::new("/usr/bin/worker")
            .arg("-v")
            .env("PROCPOOL_LOG", "debug");
        assert_eq!(cmd.program, Some(PathBuf::from("/usr/bin/worker")));
        assert_eq!(cmd.args, vec![OsString::from("-v")]);
        assert_eq!(cmd.envs.len(), 1);
    }

    #[test]
    fn test_default_is_current_exe() {
        let cmd = WorkerCommand::default();
        assert!(cmd.program.is_none());
        assert_eq!(
            cmd.resolve_program().unwrap(),
            std::env::current_exe().unwrap()
        );
    }

    #[test]
    fn test_spawn_missing_program() {
        let cmd = WorkerCommand::new("/nonexistent/procpool-worker");
        let err = spawn_worker(&cmd).err().unwrap();
        assert!(matches!(err, PoolError::Spawn(_)));
    }

    #[test]
    fn test_spawn_rejects_silent_program() {
        // `true` exits without saying anything
        let err = spawn_worker(&WorkerCommand::new("true")).err().unwrap();
        assert!(matches!(err, PoolError::Handshake(_)));
    }

    #[test]
    fn test_spawn_rejects_wrong_greeting() {
        // `echo` prints its arguments: not a NUL-terminated handshake
        let err = spawn_worker(&WorkerCommand::new("echo")).err().unwrap();
        assert!(matches!(err, PoolError::Handshake(_)));
    }
}
