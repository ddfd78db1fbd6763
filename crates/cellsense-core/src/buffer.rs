//! Fixed-capacity sample buffer with bounded serialization.
//!
//! Storage is sized at compile time and never grows. Once the buffer is full
//! further samples are rejected (never overwritten) until the caller drains
//! it, so data loss is always visible to the caller.
//!
//! ## Serialized form
//!
//! Samples are rendered as space-separated decimals (`"512 498 -3"`). Only
//! whole samples are ever written: output that would not fit is cut at a
//! sample boundary, never in the middle of a number.

use core::fmt::Write;
use core::ops::Range;

use heapless::{String, Vec};
use log::{debug, warn};

use crate::error::BufferError;

/// Number of samples held before an upload is forced.
pub const SAMPLE_CAPACITY: usize = 500;

/// Samples collected per regular collection cycle.
pub const SAMPLES_PER_CYCLE: usize = 432;

/// Bytes per serialized chunk.
///
/// Large enough for half a full buffer of 10-bit ADC readings
/// (250 × "1023" plus separators).
pub const CHUNK_CAPACITY_BYTES: usize = 1280;

/// Upper bound on chunks per snapshot, one per ThingSpeak field.
pub const MAX_CHUNKS: usize = 8;

/// Longest decimal rendering of an `i32` (`"-2147483648"`).
const MAX_TOKEN_LEN: usize = 11;

/// A serialized group of samples.
pub type Chunk = String<CHUNK_CAPACITY_BYTES>;

/// The chunk sequence of one buffer snapshot.
pub type Chunks = Vec<Chunk, MAX_CHUNKS>;

/// Append-only store of integer sensor readings.
///
/// Written by a single producer (the sampler) and drained by a single
/// consumer (the uploader), both driven from the same loop.
#[derive(Debug, Clone)]
pub struct SampleBuffer<const CAPACITY: usize = SAMPLE_CAPACITY> {
    samples: Vec<i32, CAPACITY>,
}

impl<const CAPACITY: usize> Default for SampleBuffer<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> SampleBuffer<CAPACITY> {
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Append a reading to the next free slot.
    ///
    /// Returns [`BufferError::Full`] without touching storage once the
    /// buffer holds `CAPACITY` samples.
    pub fn add_sample(&mut self, value: i32) -> Result<(), BufferError> {
        self.samples.push(value).map_err(|_| BufferError::Full)
    }

    /// Drop every stored sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Remove the oldest `count` samples, keeping anything appended after
    /// them. Returns how many were removed.
    pub fn consume(&mut self, count: usize) -> usize {
        let len = self.samples.len();
        let count = count.min(len);
        if count == 0 {
            return 0;
        }

        self.samples.copy_within(count..len, 0);
        self.samples.truncate(len - count);
        debug!("Consumed {} samples, {} remain", count, self.samples.len());
        count
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= CAPACITY
    }

    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Read-only view of the stored samples in insertion order.
    pub fn as_slice(&self) -> &[i32] {
        &self.samples
    }

    /// Serialize every stored sample into one string.
    ///
    /// At most `max_length - 1` characters are produced (the last byte is
    /// reserved for a terminator on the wire), further capped by `N`.
    pub fn serialize_all<const N: usize>(&self, max_length: usize) -> String<N> {
        let limit = max_length.saturating_sub(1).min(N);
        let mut out = String::new();
        let written = append_samples(&mut out, &self.samples, limit);
        if written < self.samples.len() {
            debug!(
                "serialize_all truncated to {} of {} samples",
                written,
                self.samples.len()
            );
        }
        out
    }

    /// Serialize as many whole samples of `range` as fit into `out`,
    /// replacing its contents. Returns the number of samples written.
    pub fn serialize_range_into<const N: usize>(
        &self,
        range: Range<usize>,
        out: &mut String<N>,
    ) -> usize {
        out.clear();
        let end = range.end.min(self.samples.len());
        let start = range.start.min(end);
        append_samples(out, &self.samples[start..end], N)
    }

    /// Partition the current contents into at most `max_chunks` contiguous
    /// groups and serialize each one.
    ///
    /// Groups hold `max(1, len / max_chunks)` samples and the last group
    /// absorbs the remainder; empty groups are skipped. The result is a
    /// snapshot: it does not track later changes to the buffer.
    pub fn serialize_chunks<const N: usize, const M: usize>(
        &self,
        max_chunks: usize,
    ) -> Result<Vec<String<N>, M>, BufferError> {
        if max_chunks == 0 || max_chunks > M {
            return Err(BufferError::InvalidChunkCount {
                requested: max_chunks,
                max: M,
            });
        }

        let len = self.samples.len();
        let mut chunks = Vec::new();
        for index in 0..max_chunks {
            let range = chunk_bounds(len, max_chunks, index);
            if range.is_empty() {
                continue;
            }

            let wanted = range.len();
            let mut chunk = String::new();
            if self.serialize_range_into(range, &mut chunk) < wanted {
                warn!("Chunk {} does not fit in {} bytes", index, N);
                return Err(BufferError::ChunkOverflow { chunk: index });
            }
            chunks
                .push(chunk)
                .map_err(|_| BufferError::InvalidChunkCount {
                    requested: max_chunks,
                    max: M,
                })?;
        }

        Ok(chunks)
    }
}

/// Sample range of chunk `index` when `len` samples are split into
/// `max_chunks` groups. Empty when the chunk has no samples.
pub fn chunk_bounds(len: usize, max_chunks: usize, index: usize) -> Range<usize> {
    if max_chunks == 0 || index >= max_chunks {
        return len..len;
    }

    let per_chunk = (len / max_chunks).max(1);
    let start = index.saturating_mul(per_chunk).min(len);
    let end = if index + 1 == max_chunks {
        len
    } else {
        (start + per_chunk).min(len)
    };
    start..end
}

/// Append whole samples to `out` while it stays within `limit` bytes.
fn append_samples<const N: usize>(out: &mut String<N>, samples: &[i32], limit: usize) -> usize {
    let limit = limit.min(N);
    let mut written = 0;

    for &value in samples {
        let token = format_sample(value);
        let separator = usize::from(!out.is_empty());
        if out.len() + separator + token.len() > limit {
            break;
        }
        if separator == 1 && out.push(' ').is_err() {
            break;
        }
        if out.push_str(&token).is_err() {
            break;
        }
        written += 1;
    }

    written
}

fn format_sample(value: i32) -> String<MAX_TOKEN_LEN> {
    let mut token = String::new();
    // Every i32 fits in MAX_TOKEN_LEN characters.
    let _ = write!(token, "{value}");
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(chunk: &str) -> std::vec::Vec<i32> {
        chunk
            .split(' ')
            .filter(|token| !token.is_empty())
            .map(|token| token.parse().unwrap())
            .collect()
    }

    fn filled<const CAPACITY: usize>(values: impl IntoIterator<Item = i32>) -> SampleBuffer<CAPACITY> {
        let mut buffer = SampleBuffer::new();
        for value in values {
            buffer.add_sample(value).unwrap();
        }
        buffer
    }

    #[test]
    fn test_rejects_when_full() {
        let mut buffer = SampleBuffer::<4>::new();
        for value in 0..4 {
            assert_eq!(buffer.add_sample(value), Ok(()));
        }
        assert!(buffer.is_full());

        assert_eq!(buffer.add_sample(99), Err(BufferError::Full));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.as_slice(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_count_never_exceeds_capacity() {
        let mut buffer = SampleBuffer::<16>::new();
        for value in 0..100 {
            let _ = buffer.add_sample(value);
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.len(), 16);
    }

    #[test]
    fn test_clear_resets_count() {
        let mut buffer = filled::<8>(0..8);
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(!buffer.is_full());
        assert_eq!(buffer.add_sample(7), Ok(()));
        assert_eq!(buffer.as_slice(), &[7]);
    }

    #[test]
    fn test_consume_keeps_newer_samples() {
        let mut buffer = filled::<8>(10..16);
        assert_eq!(buffer.consume(4), 4);
        assert_eq!(buffer.as_slice(), &[14, 15]);

        assert_eq!(buffer.consume(10), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.consume(1), 0);
    }

    #[test]
    fn test_serialize_all_formats_space_separated() {
        let buffer = filled::<8>([512, -3, 0, 1023]);
        let text: String<64> = buffer.serialize_all(64);
        assert_eq!(text.as_str(), "512 -3 0 1023");
    }

    #[test]
    fn test_serialize_all_respects_max_length() {
        let buffer = filled::<200>(0..200);
        for max_length in [0, 1, 2, 5, 10, 37, 100] {
            let text: String<512> = buffer.serialize_all(max_length);
            assert!(text.len() <= max_length.saturating_sub(1));

            let decoded = decode(&text);
            assert_eq!(decoded.as_slice(), &buffer.as_slice()[..decoded.len()]);
        }
    }

    #[test]
    fn test_serialize_all_capped_by_output_capacity() {
        let buffer = filled::<50>(100..150);
        let text: String<16> = buffer.serialize_all(1_000);
        assert_eq!(text.as_str(), "100 101 102 103");
    }

    #[test]
    fn test_chunks_scenario_432_samples_in_two_chunks() {
        let buffer = filled::<SAMPLE_CAPACITY>(0..432);
        let chunks: Chunks = buffer.serialize_chunks(2).unwrap();

        assert_eq!(chunks.len(), 2);
        let first = decode(&chunks[0]);
        let second = decode(&chunks[1]);
        assert_eq!(first, (0..216).collect::<std::vec::Vec<_>>());
        assert_eq!(second, (216..432).collect::<std::vec::Vec<_>>());
    }

    #[test]
    fn test_last_chunk_absorbs_remainder() {
        let buffer = filled::<16>(0..11);
        let chunks: Vec<String<64>, 4> = buffer.serialize_chunks(3).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(decode(&chunks[0]), [0, 1, 2]);
        assert_eq!(decode(&chunks[1]), [3, 4, 5]);
        assert_eq!(decode(&chunks[2]), [6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_fewer_samples_than_chunks_skips_empty_chunks() {
        let buffer = filled::<16>([5, 6, 7]);
        let chunks: Vec<String<32>, 8> = buffer.serialize_chunks(5).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
    }

    #[test]
    fn test_empty_buffer_produces_no_chunks() {
        let buffer = SampleBuffer::<16>::new();
        let chunks: Vec<String<32>, 8> = buffer.serialize_chunks(4).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunks_reproduce_samples_in_order() {
        for len in [1usize, 2, 7, 64, 99, 100] {
            for max_chunks in 1..=8 {
                let buffer = filled::<100>((0..len as i32).map(|v| v * 7 - 50));
                let chunks: Vec<String<512>, 8> = buffer.serialize_chunks(max_chunks).unwrap();

                assert!(chunks.len() <= max_chunks);
                let joined: std::vec::Vec<i32> =
                    chunks.iter().flat_map(|chunk| decode(chunk)).collect();
                assert_eq!(joined.as_slice(), buffer.as_slice(), "len={len} k={max_chunks}");
            }
        }
    }

    #[test]
    fn test_invalid_chunk_count() {
        let buffer = filled::<8>(0..8);
        assert_eq!(
            buffer.serialize_chunks::<32, 4>(0),
            Err(BufferError::InvalidChunkCount {
                requested: 0,
                max: 4
            })
        );
        assert_eq!(
            buffer.serialize_chunks::<32, 4>(5),
            Err(BufferError::InvalidChunkCount {
                requested: 5,
                max: 4
            })
        );
    }

    #[test]
    fn test_chunk_overflow_is_reported() {
        let buffer = filled::<8>([1000, 2000, 3000, 4000]);
        assert_eq!(
            buffer.serialize_chunks::<8, 2>(1),
            Err(BufferError::ChunkOverflow { chunk: 0 })
        );
    }

    #[test]
    fn test_serialize_range_takes_whole_samples_only() {
        let buffer = filled::<8>([123, 456, 789]);
        let mut out: String<8> = String::new();

        let taken = buffer.serialize_range_into(0..3, &mut out);
        assert_eq!(taken, 2);
        assert_eq!(out.as_str(), "123 456");

        let taken = buffer.serialize_range_into(2..10, &mut out);
        assert_eq!(taken, 1);
        assert_eq!(out.as_str(), "789");
    }

    #[test]
    fn test_chunk_bounds_partition() {
        assert_eq!(chunk_bounds(432, 2, 0), 0..216);
        assert_eq!(chunk_bounds(432, 2, 1), 216..432);
        assert_eq!(chunk_bounds(3, 5, 4), 3..3);
        assert_eq!(chunk_bounds(10, 0, 0), 10..10);
        assert_eq!(chunk_bounds(10, 2, 2), 10..10);
    }

    #[test]
    fn test_extreme_values_round_trip_through_chunk() {
        let buffer = filled::<2>([i32::MIN, i32::MAX]);
        let chunks: Vec<String<32>, 1> = buffer.serialize_chunks(1).unwrap();
        assert_eq!(decode(&chunks[0]), [i32::MIN, i32::MAX]);
    }
}
