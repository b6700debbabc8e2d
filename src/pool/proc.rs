//! Process handle for worker subprocesses.
//!
//! Wraps a child process with its two framed channels: the child's stdin for
//! requests and its stdout for replies.

use super::ipc::{FrameReader, FrameWriter, MessageWriter, PipeFd};
use super::protocol::Message;
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{PoolError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::os::unix::io::OwnedFd;
use std::time::{Duration, Instant};

/// Handle to a worker subprocess with IPC channels.
pub struct Proc {
    pid: Pid,
    /// Requests to the worker's stdin
    writer: FrameWriter,
    /// Replies from the worker's stdout; lent to a waiter thread while busy
    reader: Option<FrameReader>,
    /// Whether the process has been reaped
    reaped: bool,
}

impl Proc {
    /// Create a process handle from its components.
    pub fn new(pid: Pid, stdin: PipeFd, stdout: PipeFd) -> Self {
        Self {
            pid,
            writer: FrameWriter::new(stdin),
            reader: Some(FrameReader::new(stdout)),
            reaped: false,
        }
    }

    /// Create from a spawned `std::process::Child`, taking its stdin and stdout.
    pub fn from_child(mut child: std::process::Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("child stdout not captured".into()))?;

        Ok(Self::new(
            pid,
            PipeFd::new(OwnedFd::from(stdin)),
            PipeFd::new(OwnedFd::from(stdout)),
        ))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a message to the worker.
    pub fn send(&mut self, msg: &Message) -> Result<()> {
        self.writer.send(msg)
    }

    /// Receive one message from the worker, blocking.
    ///
    /// EOF is reported as [`PoolError::ChannelBroken`]: a live worker never
    /// closes its output.
    pub fn recv(&mut self) -> Result<Message> {
        let pid = self.pid;
        let reader = self.reader.as_mut().ok_or_else(|| {
            PoolError::ChannelBroken(format!("worker {} reader is lent to a waiter", pid))
        })?;
        reader
            .recv()?
            .ok_or_else(|| PoolError::ChannelBroken(format!("worker {} closed its output", pid)))
    }

    /// Lend the inbound channel to a waiter.
    pub fn take_reader(&mut self) -> Option<FrameReader> {
        self.reader.take()
    }

    /// Give the inbound channel back once the waiter is done with it.
    pub fn restore_reader(&mut self, reader: FrameReader) {
        self.reader = Some(reader);
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        if self.reaped {
            return false;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(_) | Err(_) => {
                self.reaped = true;
                false
            }
        }
    }

    /// Try to reap the process without blocking.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Err(PoolError::ChannelBroken(format!(
                "worker {} already reaped",
                self.pid
            )));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.reaped = true;
                Ok(Some(status))
            }
            Err(e) => Err(PoolError::Io(std::io::Error::from_raw_os_error(e as i32))),
        }
    }

    /// Send SIGKILL and reap.
    pub fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| PoolError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
        waitpid(self.pid, None)
            .map_err(|e| PoolError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
        self.reaped = true;
        Ok(())
    }

    /// Work out why a worker went away, then make sure it is gone.
    ///
    /// Polls for an exit status for up to `grace`; a worker that is still
    /// running after that is reported as [`TerminationReason::StillAlive`] and
    /// killed.
    pub fn reap(&mut self, grace: Duration) -> TerminationReason {
        if self.reaped {
            return TerminationReason::Unknown;
        }
        let start = Instant::now();
        loop {
            match self.try_wait() {
                Ok(Some(status)) => return analyze_wait_status(status),
                Ok(None) if start.elapsed() < grace => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(None) => {
                    let _ = self.kill();
                    return TerminationReason::StillAlive;
                }
                Err(_) => {
                    self.reaped = true;
                    return TerminationReason::Unknown;
                }
            }
        }
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}
