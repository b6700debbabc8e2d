//! Worker subprocess main entry point.
//!
//! This runs when the executable is started with [`WORKER_FLAG`]. It greets
//! the coordinator, then runs one job per `TASK` message for the rest of its
//! life.

use super::ipc::{FrameReader, FrameWriter, MessageWriter, PipeFd};
use super::protocol::{Message, TASK};
use super::registry::{JobOutput, JobRegistry, split_task, tokenize_args};
use crate::error::{PoolError, Result};
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::os::unix::io::OwnedFd;
use tracing::{debug, error};

/// Sentinel argument that puts the executable into worker mode.
pub const WORKER_FLAG: &str = "--internal-worker";

/// Whether the process was started as a pool worker.
///
/// Pass the process arguments, e.g. `std::env::args_os()`.
pub fn is_worker_process<I, S>(args: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter().skip(1).any(|arg| arg.as_ref() == WORKER_FLAG)
}

/// Run one task body against the registry, streaming job output back.
///
/// Returns the job's status code. The coordinator never sees it.
fn run_task<W: Write>(
    body: &str,
    writer: &mut FrameWriter<W>,
    registry: &JobRegistry,
) -> Result<i32> {
    writer.send(&Message::print(format!("Starting task \"{}\"", body)))?;

    let (job_name, params) = split_task(body);
    let job = registry
        .get(job_name)
        .ok_or_else(|| PoolError::UnknownJob(job_name.to_string()))?;
    let args = tokenize_args(params);

    let mut output = JobOutput::new(writer);
    let code = job(args.as_slice(), &mut output);
    output
        .finish()
        .map_err(|e| PoolError::ChannelBroken(e.to_string()))?;

    debug!(job = job_name, args = args.len(), code, "Job finished");
    Ok(code)
}

/// Worker main loop.
///
/// Sends the handshake, then serves `TASK` messages until the coordinator
/// closes the channel. Any other tag is answered with `STATE: IDLE` only.
pub fn worker_loop<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    registry: &JobRegistry,
) -> Result<()> {
    writer.send(&Message::handshake())?;

    loop {
        let msg = match reader.recv()? {
            Some(msg) => msg,
            // EOF - coordinator closed the pipe
            None => return Ok(()),
        };

        if msg.tag() != TASK {
            debug!(tag = msg.tag(), "Ignoring non-task message");
            writer.send(&Message::idle())?;
            continue;
        }

        run_task(msg.body(), writer, registry)?;

        // The extra acknowledgement is part of the protocol; the coordinator skips it
        writer.send(&Message::ack())?;
        writer.send(&Message::idle())?;
    }
}

/// Take over stdin/stdout as the protocol channel.
///
/// Fd 1 is pointed at stderr afterwards so a stray `println!` in a job cannot
/// corrupt the framing.
fn take_stdio_channel() -> Result<(FrameReader, FrameWriter)> {
    let channel_out: OwnedFd = nix::unistd::dup(std::io::stdout())
        .map_err(|e| PoolError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
    nix::unistd::dup2_stdout(std::io::stderr())
        .map_err(|e| PoolError::Io(std::io::Error::from_raw_os_error(e as i32)))?;

    // Safety: fd 0 is the pipe the coordinator set up and nothing else reads it
    let stdin_fd = unsafe { PipeFd::from_raw(0) };

    Ok((
        FrameReader::new(stdin_fd),
        FrameWriter::new(PipeFd::new(channel_out)),
    ))
}

/// Run the worker subprocess main function.
///
/// Exits with status 0 when the coordinator hangs up and 1 on any protocol
/// error, including an unknown job name.
pub fn run_worker_main(registry: &JobRegistry) -> ! {
    // Ignore SIGPIPE - pipe errors come back as io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let result = take_stdio_channel()
        .and_then(|(mut reader, mut writer)| worker_loop(&mut reader, &mut writer, registry));

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(pid = std::process::id(), error = %e, "Worker stopping");
            std::process::exit(1);
        }
    }
}
