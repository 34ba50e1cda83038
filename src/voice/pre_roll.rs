//! Pre-roll buffer for per-speaker audio capture.
//!
//! Maintains the last N milliseconds of decoded audio so that the first
//! phonemes of an utterance are not clipped when the platform reports a
//! speaking event slightly late.

use crate::defaults::pcm_duration_ms;
use std::collections::VecDeque;

/// Sliding window of recent PCM chunks, bounded by duration.
#[derive(Debug)]
pub struct PreRollBuffer {
    chunks: VecDeque<Vec<u8>>,
    max_duration_ms: f64,
    sample_rate: u32,
    current_duration_ms: f64,
}

impl PreRollBuffer {
    /// Creates a buffer that retains at most `max_duration_ms` of audio.
    pub fn new(max_duration_ms: u32, sample_rate: u32) -> Self {
        Self {
            chunks: VecDeque::new(),
            max_duration_ms: f64::from(max_duration_ms),
            sample_rate,
            current_duration_ms: 0.0,
        }
    }

    /// Appends a chunk with its caller-known duration.
    ///
    /// Oldest chunks are evicted until the buffered duration is back within
    /// budget. A single chunk is never split, so one oversized chunk may
    /// remain by itself.
    pub fn add(&mut self, chunk: Vec<u8>, duration_ms: f64) {
        self.chunks.push_back(chunk);
        self.current_duration_ms += duration_ms;

        // Evicted durations are recomputed from byte length so accounting
        // stays consistent even if caller-supplied durations were rounded.
        while self.current_duration_ms > self.max_duration_ms && self.chunks.len() > 1 {
            if let Some(removed) = self.chunks.pop_front() {
                self.current_duration_ms -= pcm_duration_ms(removed.len(), self.sample_rate);
            }
        }
    }

    /// Returns all buffered chunks as one contiguous byte sequence.
    pub fn get_buffer(&self) -> Vec<u8> {
        let total: usize = self.chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Current buffered duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.current_duration_ms
    }

    /// Resets the buffer to empty.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.current_duration_ms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_concatenates_in_order() {
        let mut buffer = PreRollBuffer::new(500, 16000);
        buffer.add(vec![1, 2, 3, 4], 10.0);
        buffer.add(vec![5, 6, 7, 8], 10.0);

        assert_eq!(buffer.get_buffer(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!((buffer.duration_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn empty_buffer_yields_empty_bytes() {
        let buffer = PreRollBuffer::new(500, 16000);
        assert!(buffer.get_buffer().is_empty());
        assert_eq!(buffer.duration_ms(), 0.0);
    }

    #[test]
    fn evicts_oldest_chunks_past_budget() {
        let mut buffer = PreRollBuffer::new(100, 16000);

        // Each 50ms chunk at 16kHz mono 16-bit is 1600 bytes.
        let chunk = vec![0u8; 1600];
        buffer.add(chunk.clone(), 50.0);
        buffer.add(chunk.clone(), 50.0);
        assert!((buffer.duration_ms() - 100.0).abs() < 1e-6);

        // Third chunk pushes us over; the first is evicted.
        buffer.add(chunk.clone(), 50.0);
        assert!(buffer.duration_ms() <= 100.0 + 1e-6);
        assert_eq!(buffer.get_buffer().len(), 3200);
    }

    #[test]
    fn duration_stays_bounded_across_many_adds() {
        let mut buffer = PreRollBuffer::new(500, 16000);
        let chunk = vec![0u8; 640]; // 20ms

        for _ in 0..200 {
            buffer.add(chunk.clone(), 20.0);
            if buffer.get_buffer().len() > 640 {
                assert!(
                    buffer.duration_ms() <= 500.0 + 1e-6,
                    "duration {} exceeds budget",
                    buffer.duration_ms()
                );
            }
        }
    }

    #[test]
    fn single_oversized_chunk_is_never_split() {
        let mut buffer = PreRollBuffer::new(100, 16000);

        // One 500ms chunk: 16000 bytes.
        buffer.add(vec![0u8; 16000], 500.0);
        assert_eq!(buffer.get_buffer().len(), 16000);
        assert!((buffer.duration_ms() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn eviction_uses_recomputed_durations() {
        let mut buffer = PreRollBuffer::new(100, 16000);

        // Caller claims 10ms but the chunk is really 50ms of bytes.
        buffer.add(vec![0u8; 1600], 10.0);
        buffer.add(vec![0u8; 1600], 10.0);
        // Claimed total 20ms, nothing evicted yet.
        assert_eq!(buffer.get_buffer().len(), 3200);

        // Force eviction: the removed chunk subtracts its true 50ms.
        buffer.add(vec![0u8; 3200], 100.0);
        assert!(buffer.duration_ms() <= 100.0 + 1e-6);
    }

    #[test]
    fn clear_resets_everything() {
        let mut buffer = PreRollBuffer::new(500, 16000);
        buffer.add(vec![1, 2, 3, 4], 10.0);
        buffer.clear();

        assert!(buffer.get_buffer().is_empty());
        assert_eq!(buffer.duration_ms(), 0.0);
    }
}
