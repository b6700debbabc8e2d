//! Wire protocol between the coordinator and its worker processes.
//!
//! Every message is a `(tag, body)` pair written as `"<tag>: <body>"` followed
//! by a single NUL terminator. The same framing is used in both directions.

use crate::error::{PoolError, Result};
use std::fmt;

/// Byte that ends every frame. Never valid inside a message.
pub const TERMINATOR: u8 = b'\0';

/// Separates the tag from the body.
pub const DIVIDER: &str = ": ";

/// Tag of a task sent from coordinator to worker (`job-name [args]`).
pub const TASK: &str = "TASK";
/// Tag of a log line sent from worker to coordinator.
pub const PRINT: &str = "PRINT";
/// Tag of a state report sent from worker to coordinator.
pub const STATE: &str = "STATE";
/// Tag of the extra acknowledgement a worker sends after each task.
pub const ACK: &str = "NULL";
/// Tag of the startup handshake.
pub const HANDSHAKE_TAG: &str = "ACK_INIT";

/// Body of a `STATE` message announcing the worker is ready for more work.
pub const IDLE: &str = "IDLE";
/// Body of the startup handshake.
pub const HANDSHAKE_BODY: &str = "Child process reporting for duty";

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    tag: String,
    body: String,
}

impl Message {
    /// Create a message from its parts.
    pub fn new(tag: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            body: body.into(),
        }
    }

    /// A `TASK` message carrying `task` as its body.
    pub fn task(task: impl Into<String>) -> Self {
        Self::new(TASK, task)
    }

    /// A `PRINT` message carrying one log line.
    pub fn print(line: impl Into<String>) -> Self {
        Self::new(PRINT, line)
    }

    /// The `STATE: IDLE` completion message.
    pub fn idle() -> Self {
        Self::new(STATE, IDLE)
    }

    /// The `NULL: ` acknowledgement sent after each task.
    pub fn ack() -> Self {
        Self::new(ACK, "")
    }

    /// The handshake a worker sends once at startup.
    pub fn handshake() -> Self {
        Self::new(HANDSHAKE_TAG, HANDSHAKE_BODY)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether this is the `STATE: IDLE` completion message.
    pub fn is_idle(&self) -> bool {
        self.tag == STATE && self.body == IDLE
    }

    /// Encode to wire bytes, terminator included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.tag.contains(DIVIDER) || self.tag.as_bytes().contains(&TERMINATOR) {
            return Err(PoolError::MalformedMessage(format!(
                "tag {:?} contains a reserved sequence",
                self.tag
            )));
        }
        if self.body.as_bytes().contains(&TERMINATOR) {
            return Err(PoolError::MalformedMessage(format!(
                "body of {} message contains the terminator byte",
                self.tag
            )));
        }

        let mut bytes = Vec::with_capacity(self.tag.len() + DIVIDER.len() + self.body.len() + 1);
        bytes.extend_from_slice(self.tag.as_bytes());
        bytes.extend_from_slice(DIVIDER.as_bytes());
        bytes.extend_from_slice(self.body.as_bytes());
        bytes.push(TERMINATOR);
        Ok(bytes)
    }

    /// Decode one frame. A trailing terminator is accepted and ignored.
    ///
    /// A frame that is not valid UTF-8 is malformed.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let frame = frame.strip_suffix(&[TERMINATOR]).unwrap_or(frame);
        let text = std::str::from_utf8(frame)
            .map_err(|e| PoolError::MalformedMessage(format!("invalid UTF-8: {}", e)))?;
        Self::parse(text)
    }

    /// Parse the textual form `"<tag>: <body>"`, splitting on the first divider.
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once(DIVIDER) {
            Some((tag, body)) => Ok(Self::new(tag, body)),
            None => Err(PoolError::MalformedMessage(format!(
                "no divider in {:?}",
                text
            ))),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.tag, DIVIDER, self.body)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any frameable message decodes back to itself.
        #[test]
        fn encode_decode_roundtrip(tag in "[A-Z_]{1,12}", body in "[^\\x00]*") {
            let msg = Message::new(tag, body);
            let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, msg);
        }

        /// Bodies may carry the divider; only the first one splits.
        #[test]
        fn roundtrip_with_divider_in_body(head in "[^\\x00]*", tail in "[^\\x00]*") {
            let msg = Message::print(format!("{}{}{}", head, DIVIDER, tail));
            let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, msg);
        }

        /// Decoding arbitrary bytes returns an error instead of panicking.
        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = Message::decode(&bytes);
        }

        #[test]
        fn parse_never_panics(s in "\\PC*") {
            let _ = Message::parse(&s);
        }
    }
}
