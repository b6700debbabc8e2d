//! Job registry and task parsing.
//!
//! A task body is `job-name` followed by raw argument text. The argument text
//! is split on spaces outside double quotes; the quotes themselves stay in the
//! tokens, so `"a b" c` becomes `"a b"` and `c`.

use super::ipc::MessageWriter;
use super::protocol::{Message, TERMINATOR};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Signature of a job: parsed arguments in, status code out.
pub type JobFn = dyn Fn(&[String], &mut JobOutput<'_>) -> i32 + Send + Sync;

/// Immutable mapping from job name to callable.
///
/// Must be identical in the coordinator's binary and every worker it spawns.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<JobFn>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` under `name`, replacing any earlier job of that name.
    pub fn with_job<F>(mut self, name: impl Into<String>, job: F) -> Self
    where
        F: Fn(&[String], &mut JobOutput<'_>) -> i32 + Send + Sync + 'static,
    {
        self.jobs.insert(name.into(), Arc::new(job));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<JobFn>> {
        self.jobs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Registered job names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

/// Split a task body into job name and raw argument text at the first space.
pub fn split_task(body: &str) -> (&str, &str) {
    body.split_once(' ').unwrap_or((body, ""))
}

/// Tokenize argument text on spaces outside double quotes, keeping the quotes.
///
/// Consecutive spaces produce empty tokens; a single trailing space does not
/// produce one. An unbalanced quote runs to the end of the text.
pub fn tokenize_args(params: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = params;

    while !rest.is_empty() {
        let mut in_quotes = false;
        let mut split_at = None;
        for (i, c) in rest.char_indices() {
            if c == '"' {
                in_quotes = !in_quotes;
            }
            if !in_quotes && c == ' ' {
                split_at = Some(i);
                break;
            }
        }
        match split_at {
            Some(i) => {
                tokens.push(rest[..i].to_string());
                rest = &rest[i + 1..];
            }
            None => {
                tokens.push(rest.to_string());
                rest = "";
            }
        }
    }

    tokens
}

/// Output handle passed to a running job.
///
/// Bytes written here are cut into lines and forwarded to the coordinator as
/// `PRINT` messages as soon as each line is complete.
pub struct JobOutput<'a> {
    channel: &'a mut dyn MessageWriter,
    pending: Vec<u8>,
}

impl<'a> JobOutput<'a> {
    pub fn new(channel: &'a mut dyn MessageWriter) -> Self {
        Self {
            channel,
            pending: Vec::new(),
        }
    }

    /// Send one line. Convenience for jobs that don't care about I/O errors.
    pub fn print(&mut self, line: impl AsRef<str>) {
        let _ = writeln!(self, "{}", line.as_ref());
    }

    /// Forward any unterminated trailing text as a last line.
    pub fn finish(mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.send_line(&line)?;
        }
        Ok(())
    }

    fn send_line(&mut self, raw: &[u8]) -> io::Result<()> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line: String = String::from_utf8_lossy(raw)
            .chars()
            .filter(|&c| c != TERMINATOR as char)
            .collect();
        self.channel
            .send(&Message::print(line))
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
    }
}

impl Write for JobOutput<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.send_line(&line[..line.len() - 1])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn tokenize_never_panics(s in "\\PC*") {
            let _ = tokenize_args(&s);
        }

        /// Quotes are kept in the tokens, never stripped.
        #[test]
        fn tokenize_keeps_every_quote(s in "[a-z\" ]{0,40}") {
            let quotes = |t: &str| t.matches('"').count();
            let kept: usize = tokenize_args(&s).iter().map(|t| quotes(t)).sum();
            prop_assert_eq!(kept, quotes(&s));
        }

        /// Without quotes, tokens are the space-separated pieces minus a trailing empty one.
        #[test]
        fn tokenize_unquoted_matches_split(s in "[a-z ]{1,40}") {
            let mut expected: Vec<String> = s.split(' ').map(String::from).collect();
            if s.ends_with(' ') {
                expected.pop();
            }
            prop_assert_eq!(tokenize_args(&s), expected);
        }
    }
}
