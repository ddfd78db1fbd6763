//! AT-command request/response helpers.
//!
//! Waiting for a modem reply is split into steps: [`send_command`] writes the
//! command and returns a [`ResponseWaiter`], and the caller's loop calls
//! [`ResponseWaiter::poll_once`] until it reports a match or a timeout. A
//! poll only consumes bytes that are already buffered, so other work keeps
//! running between polls.

use embassy_time::Duration;
use heapless::Vec;
use log::{debug, warn};

use crate::clock::{Clock, TimerGate};
use crate::error::LinkError;
use crate::transport::ByteStream;

/// Reply that marks a successful command.
pub const DEFAULT_EXPECTED: &str = "OK";

/// Bytes of the most recent reply kept for matching and diagnostics.
pub const RESPONSE_WINDOW: usize = 128;

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePoll {
    /// The expected text has been received.
    Matched,
    /// Not seen yet, keep polling.
    Pending,
    /// The timeout elapsed first.
    TimedOut,
}

impl ResponsePoll {
    /// `None` while pending, otherwise the final result of the wait.
    pub fn outcome(self) -> Option<Result<(), LinkError>> {
        match self {
            Self::Matched => Some(Ok(())),
            Self::Pending => None,
            Self::TimedOut => Some(Err(LinkError::Timeout)),
        }
    }
}

/// Watches a byte stream for an expected reply.
///
/// Only the last `N` bytes are kept, so `expected` must not be longer than
/// `N` to be matchable.
#[derive(Debug)]
pub struct ResponseWaiter<'e, const N: usize = RESPONSE_WINDOW> {
    expected: &'e str,
    received: Vec<u8, N>,
    gate: TimerGate,
    matched: bool,
}

impl<'e, const N: usize> ResponseWaiter<'e, N> {
    pub fn new(expected: &'e str, timeout: Duration, clock: &impl Clock) -> Self {
        if expected.len() > N {
            warn!("Expected reply {:?} longer than the {} byte window", expected, N);
        }
        Self {
            expected,
            received: Vec::new(),
            gate: TimerGate::start(clock, timeout),
            matched: expected.is_empty(),
        }
    }

    /// Consume whatever is buffered on `port` and report progress.
    ///
    /// Once matched, the waiter stays matched.
    pub fn poll_once<S: ByteStream>(&mut self, port: &mut S, clock: &impl Clock) -> ResponsePoll {
        if self.matched {
            return ResponsePoll::Matched;
        }

        let pending = port.available();
        for _ in 0..pending {
            let Some(byte) = port.read_byte() else {
                break;
            };
            self.push(byte);
            if self.received.ends_with(self.expected.as_bytes()) {
                self.matched = true;
                return ResponsePoll::Matched;
            }
        }

        if self.gate.is_elapsed(clock) {
            debug!("Timed out waiting for {:?}", self.expected);
            ResponsePoll::TimedOut
        } else {
            ResponsePoll::Pending
        }
    }

    /// The most recent bytes received, oldest first.
    pub fn received(&self) -> &[u8] {
        &self.received
    }

    pub fn expected(&self) -> &'e str {
        self.expected
    }

    fn push(&mut self, byte: u8) {
        if self.received.is_full() {
            self.received.remove(0);
        }
        // Cannot fail, a slot was just freed.
        let _ = self.received.push(byte);
    }
}

/// Write `command` followed by CRLF and start waiting for `expected`.
pub fn send_command<'e, S, const N: usize>(
    port: &mut S,
    command: &str,
    expected: &'e str,
    timeout: Duration,
    clock: &impl Clock,
) -> Result<ResponseWaiter<'e, N>, S::Error>
where
    S: ByteStream,
{
    port.write_all(command.as_bytes())?;
    port.write_all(b"\r\n")?;
    port.flush()?;
    debug!("AT >> {}", command);
    Ok(ResponseWaiter::new(expected, timeout, clock))
}

/// Discard everything currently buffered on `port`. Returns the number of
/// bytes dropped.
pub fn clear_input<S: ByteStream>(port: &mut S) -> usize {
    let pending = port.available();
    let mut dropped = 0;
    for _ in 0..pending {
        if port.read_byte().is_none() {
            break;
        }
        dropped += 1;
    }
    dropped
}
