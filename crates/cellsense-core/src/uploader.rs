//! Cooperative upload cycle.
//!
//! The uploader decides when buffered samples go out and walks them through
//! the connection manager one chunk per step:
//!
//! 1. **Idle**: wait until the buffer is full or the transmit interval has
//!    elapsed with samples pending, then snapshot the sample count.
//! 2. **Sending**: serialize the next group of the snapshot and send it as a
//!    channel update.
//! 3. **AwaitingResponse**: drain the server response (a bounded number of
//!    bytes per tick) until the server hangs up or `data_timeout` elapses.
//! 4. **Backoff**: after a failed send, wait `retry_delay` before trying
//!    again. After `max_retry_attempts` consecutive failures the cycle is
//!    abandoned; unsent samples stay buffered for the next cycle.
//!
//! Samples are only removed from the buffer once they have been sent, and
//! samples recorded while a cycle is running are kept for the next one.

use core::ops::Range;

use log::{debug, error, info, warn};

use crate::buffer::{Chunk, SampleBuffer};
use crate::clock::{Clock, TimerGate};
use crate::config::Config;
use crate::connection::{ConnectionManager, ResponseEvent};
use crate::error::LinkError;
use crate::thingspeak::{self, Method};
use crate::transport::Transport;

/// Response bytes consumed per tick while awaiting a response.
pub const RESPONSE_BYTES_PER_TICK: usize = 64;

/// What an [`Uploader::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadProgress {
    /// Nothing to upload yet.
    Idle,
    /// A cycle is running and waiting on the network or a timer.
    Waiting,
    /// A new cycle took a snapshot of `samples` buffered samples.
    Started { samples: usize },
    /// Chunk `index` carrying `samples` samples was written to the server.
    ChunkSent { index: usize, samples: usize },
    /// A send failed; it is retried after the retry delay.
    SendFailed(LinkError),
    /// Too many consecutive failures; unsent samples remain buffered.
    Abandoned(LinkError),
    /// Every sample of the snapshot was sent and removed from the buffer.
    Completed { samples: usize },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub cycles_completed: u32,
    pub cycles_abandoned: u32,
    pub chunks_sent: u32,
    pub send_failures: u32,
    pub samples_uploaded: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Sending,
    AwaitingResponse(TimerGate),
    Backoff(TimerGate),
}

/// Progress through one snapshot of the buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Cycle {
    snapshot_len: usize,
    per_chunk: usize,
    /// Samples of the snapshot already sent
    cursor: usize,
    chunk_index: usize,
    attempts: u8,
}

impl Cycle {
    fn new(snapshot_len: usize, max_chunks: usize) -> Self {
        Self {
            snapshot_len,
            per_chunk: (snapshot_len / max_chunks.max(1)).max(1),
            ..Default::default()
        }
    }

    /// Samples of the next chunk. The last planned chunk takes everything
    /// that is left.
    fn next_range(&self, max_chunks: usize) -> Range<usize> {
        let end = if self.chunk_index + 1 >= max_chunks {
            self.snapshot_len
        } else {
            (self.cursor + self.per_chunk).min(self.snapshot_len)
        };
        self.cursor..end
    }

    fn is_done(&self) -> bool {
        self.cursor >= self.snapshot_len
    }
}

pub struct Uploader<'a, C: Clock> {
    config: &'a Config<'a>,
    clock: C,
    phase: Phase,
    cycle: Cycle,
    transmit_gate: TimerGate,
    /// Set after an abandoned cycle: a full buffer alone does not restart
    /// uploading until the transmit interval has passed again.
    holdoff: bool,
    stats: UploadStats,
    chunk: Chunk,
}

impl<'a, C: Clock> Uploader<'a, C> {
    pub fn new(config: &'a Config<'a>, clock: C) -> Self {
        let transmit_gate = TimerGate::start(&clock, config.timing.transmit_interval);
        Self {
            config,
            clock,
            phase: Phase::Idle,
            cycle: Cycle::default(),
            transmit_gate,
            holdoff: false,
            stats: UploadStats::default(),
            chunk: Chunk::new(),
        }
    }

    /// Advance the upload cycle by one step. Never blocks.
    pub fn tick<T, L, const CAPACITY: usize>(
        &mut self,
        buffer: &mut SampleBuffer<CAPACITY>,
        link: &mut ConnectionManager<'_, T, L>,
    ) -> UploadProgress
    where
        T: Transport,
        L: Clock,
    {
        match self.phase {
            Phase::Idle => self.maybe_start(buffer),
            Phase::Sending => self.send_next(buffer, link),
            Phase::Backoff(gate) => {
                if gate.is_elapsed(&self.clock) {
                    self.phase = Phase::Sending;
                    self.send_next(buffer, link)
                } else {
                    UploadProgress::Waiting
                }
            }
            Phase::AwaitingResponse(gate) => self.await_response(gate, buffer, link),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    fn maybe_start<const CAPACITY: usize>(
        &mut self,
        buffer: &SampleBuffer<CAPACITY>,
    ) -> UploadProgress {
        let due = self.transmit_gate.is_elapsed(&self.clock);
        let forced = buffer.is_full() && !self.holdoff;

        if buffer.is_empty() {
            if due {
                self.transmit_gate.reset(&self.clock, None);
            }
            return UploadProgress::Idle;
        }
        if !(due || forced) {
            return UploadProgress::Idle;
        }

        let samples = buffer.len();
        self.cycle = Cycle::new(samples, self.config.upload.chunks_per_upload);
        self.phase = Phase::Sending;
        self.holdoff = false;
        info!(
            "Starting upload of {} samples ({})",
            samples,
            if forced { "buffer full" } else { "interval" }
        );
        UploadProgress::Started { samples }
    }

    fn send_next<T, L, const CAPACITY: usize>(
        &mut self,
        buffer: &mut SampleBuffer<CAPACITY>,
        link: &mut ConnectionManager<'_, T, L>,
    ) -> UploadProgress
    where
        T: Transport,
        L: Clock,
    {
        let mut cycle = self.cycle;
        let range = cycle.next_range(self.config.upload.chunks_per_upload);
        let wanted = range.len();
        let taken = buffer.serialize_range_into(range, &mut self.chunk);
        if taken == 0 {
            error!("Sample does not fit in an empty chunk, abandoning upload");
            return self.abandon(buffer, LinkError::RequestTooLong);
        }
        if taken < wanted {
            debug!("Chunk {} holds {} of {} samples", cycle.chunk_index, taken, wanted);
        }

        let channel = &self.config.channel;
        let path = match thingspeak::write_path(channel, channel.field, &self.chunk) {
            Ok(path) => path,
            Err(e) => {
                error!("Cannot build update request: {}", e);
                return self.abandon(buffer, e);
            }
        };

        match link.send_data(&path, Method::Get) {
            Ok(()) => {
                let index = cycle.chunk_index;
                cycle.cursor += taken;
                cycle.chunk_index += 1;
                cycle.attempts = 0;
                self.cycle = cycle;
                self.stats.chunks_sent = self.stats.chunks_sent.saturating_add(1);
                self.phase = Phase::AwaitingResponse(TimerGate::start(
                    &self.clock,
                    self.config.timing.data_timeout,
                ));
                debug!("Chunk {} sent ({} samples)", index, taken);
                UploadProgress::ChunkSent {
                    index,
                    samples: taken,
                }
            }
            // The link is holding off reconnects; try again next tick.
            Err(LinkError::RateLimited) => UploadProgress::Waiting,
            Err(e) => {
                cycle.attempts = cycle.attempts.saturating_add(1);
                self.cycle = cycle;
                self.stats.send_failures = self.stats.send_failures.saturating_add(1);

                if cycle.attempts >= self.config.upload.max_retry_attempts {
                    warn!("Upload failed {} times: {}", cycle.attempts, e);
                    return self.abandon(buffer, e);
                }

                warn!(
                    "Upload attempt {} failed: {}, retrying later",
                    cycle.attempts, e
                );
                self.phase = Phase::Backoff(TimerGate::start(
                    &self.clock,
                    self.config.timing.retry_delay,
                ));
                UploadProgress::SendFailed(e)
            }
        }
    }

    fn await_response<T, L, const CAPACITY: usize>(
        &mut self,
        gate: TimerGate,
        buffer: &mut SampleBuffer<CAPACITY>,
        link: &mut ConnectionManager<'_, T, L>,
    ) -> UploadProgress
    where
        T: Transport,
        L: Clock,
    {
        let mut closed = false;
        for _ in 0..RESPONSE_BYTES_PER_TICK {
            match link.handle_response() {
                ResponseEvent::Byte(_) => {}
                ResponseEvent::Pending => break,
                ResponseEvent::Closed => {
                    closed = true;
                    break;
                }
            }
        }

        if !closed {
            if !gate.is_elapsed(&self.clock) {
                return UploadProgress::Waiting;
            }
            warn!("No end of response within the data timeout, closing");
            link.close_request();
        }

        if self.cycle.is_done() {
            return self.complete(buffer);
        }
        self.phase = Phase::Sending;
        UploadProgress::Waiting
    }

    fn complete<const CAPACITY: usize>(
        &mut self,
        buffer: &mut SampleBuffer<CAPACITY>,
    ) -> UploadProgress {
        let samples = buffer.consume(self.cycle.snapshot_len);
        self.stats.cycles_completed = self.stats.cycles_completed.saturating_add(1);
        self.stats.samples_uploaded = self
            .stats
            .samples_uploaded
            .saturating_add(u32::try_from(samples).unwrap_or(u32::MAX));
        self.finish_cycle();
        info!("Upload complete, {} samples sent", samples);
        UploadProgress::Completed { samples }
    }

    fn abandon<const CAPACITY: usize>(
        &mut self,
        buffer: &mut SampleBuffer<CAPACITY>,
        error: LinkError,
    ) -> UploadProgress {
        // Whatever already went out must not be sent twice.
        let sent = buffer.consume(self.cycle.cursor);
        self.stats.cycles_abandoned = self.stats.cycles_abandoned.saturating_add(1);
        self.finish_cycle();
        self.holdoff = true;
        warn!(
            "Upload abandoned after {} samples, {} kept for the next cycle",
            sent,
            buffer.len()
        );
        UploadProgress::Abandoned(error)
    }

    fn finish_cycle(&mut self) {
        self.cycle = Cycle::default();
        self.phase = Phase::Idle;
        self.transmit_gate.reset(&self.clock, None);
    }
}
