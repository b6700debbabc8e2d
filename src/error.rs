//! Error types for procpool.

use crate::pool::WorkerFailure;
use std::time::Duration;
use thiserror::Error;

/// Main error type for procpool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("No job named '{0}'")]
    UnknownJob(String),

    #[error("Channel broken: {0}")]
    ChannelBroken(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Worker failed handshake: {0}")]
    Handshake(String),

    #[error("{0}")]
    Escalated(WorkerFailure),

    #[error("No live workers left to run {queued} queued task(s)")]
    NoLiveWorkers { queued: usize },

    #[error("Timed out after {0:?} waiting for the pool to go idle")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Whether this error means the peer on the other end of a channel is gone.
    pub fn is_channel_broken(&self) -> bool {
        matches!(self, Self::ChannelBroken(_))
    }
}

/// Result type alias for procpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::TerminationReason;
    use std::io;

    #[test]
    fn test_unknown_job_error_message() {
        let err = PoolError::UnknownJob("frobnicate".to_string());
        let msg = err.to_string();
        assert!(msg.contains("frobnicate"));
        assert!(msg.contains("No job"));
    }

    #[test]
    fn test_malformed_message_error_message() {
        let err = PoolError::MalformedMessage("no divider in \"HELLO\"".to_string());
        assert!(err.to_string().starts_with("Malformed message"));
        assert!(err.to_string().contains("HELLO"));
    }

    #[test]
    fn test_no_live_workers_message() {
        let err = PoolError::NoLiveWorkers { queued: 3 };
        assert!(err.to_string().contains("3 queued"));
    }

    #[test]
    fn test_escalated_passes_failure_through() {
        let failure = WorkerFailure::new(1, TerminationReason::Exited(1)).with_task("crash");
        let err = PoolError::Escalated(failure.clone());
        assert_eq!(err.to_string(), failure.to_string());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: PoolError = io_err.into();
        assert!(err.to_string().contains("pipe closed"));
        assert!(!err.is_channel_broken());
    }

    #[test]
    fn test_is_channel_broken() {
        assert!(PoolError::ChannelBroken("eof".into()).is_channel_broken());
        assert!(!PoolError::UnknownJob("x".into()).is_channel_broken());
    }
}
