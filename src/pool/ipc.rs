//! Buffered framed I/O over worker pipes.
//!
//! Frames are terminator-delimited byte strings (see [`super::protocol`]).
//! Reads and writes on raw pipe descriptors retry on EINTR.

use super::protocol::{Message, TERMINATOR};
use crate::error::{PoolError, Result};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is an open descriptor nothing else owns.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl From<OwnedFd> for PipeFd {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Anything that can put a [`Message`] on a channel.
pub trait MessageWriter {
    fn send(&mut self, msg: &Message) -> Result<()>;
}

/// Reads terminator-delimited frames.
pub struct FrameReader<R = PipeFd> {
    reader: BufReader<R>,
    frame: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, inner),
            frame: Vec::with_capacity(4096),
        }
    }

    /// Read one frame without its terminator, borrowing the internal buffer.
    ///
    /// Returns `None` on a clean EOF between frames. EOF in the middle of a
    /// frame is an `UnexpectedEof` error.
    pub fn read_frame(&mut self) -> io::Result<Option<&[u8]>> {
        self.frame.clear();
        let n = self.reader.read_until(TERMINATOR, &mut self.frame)?;
        if n == 0 {
            return Ok(None);
        }
        if self.frame.last() != Some(&TERMINATOR) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended mid-frame after {} bytes", self.frame.len()),
            ));
        }
        self.frame.pop();
        Ok(Some(&self.frame))
    }

    /// Read and decode one message. Returns `None` when the peer closed the channel.
    pub fn recv(&mut self) -> Result<Option<Message>> {
        match self.read_frame() {
            Ok(Some(frame)) => Message::decode(frame).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(PoolError::ChannelBroken(format!("read failed: {}", e))),
        }
    }
}

/// Writes terminator-delimited frames, flushing after each one.
pub struct FrameWriter<W: Write = PipeFd> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, inner),
        }
    }

    /// Write already-encoded frame bytes and flush.
    pub fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}

impl<W: Write> MessageWriter for FrameWriter<W> {
    fn send(&mut self, msg: &Message) -> Result<()> {
        let bytes = msg.encode()?;
        self.write_frame(&bytes)
            .map_err(|e| PoolError::ChannelBroken(format!("write failed: {}", e)))
    }
}
