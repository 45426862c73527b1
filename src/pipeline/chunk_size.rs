//! Adaptive chunk sizing for the Data Pipeline (§4.5).
//!
//! A shared atomic governs how much data the encoder packs per frame: after
//! each `SUCC`, fast chunks double the size (capped at
//! `max-buffer-size`), slow chunks shrink proportionally to how many whole
//! seconds they took (floored at 1 KiB).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::model::{MIN_BUFFER_SIZE, MAX_BUFFER_SIZE};

const DOUBLE_THRESHOLD: Duration = Duration::from_millis(500);
const SHRINK_THRESHOLD: Duration = Duration::from_secs(2);

/// Shared, lock-free chunk-size slot. Cheap to clone (an `Arc` around the
/// atomic) so every pipeline task can read and adjust it without a mutex.
pub struct ChunkSizer {
    size: AtomicU64,
    max: u64,
    /// Number of chunks remaining in the startup "buf-init" phase, during
    /// which the encoder blocks until each ack lands before sizing grows.
    buf_init_remaining: AtomicU64,
}

impl ChunkSizer {
    pub fn new(initial: u64, max_buffer_size: u64) -> Self {
        let max = max_buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        ChunkSizer {
            size: AtomicU64::new(initial.clamp(MIN_BUFFER_SIZE, max)),
            max,
            buf_init_remaining: AtomicU64::new(4),
        }
    }

    pub fn current(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// True while in the startup phase, where the encoder must wait for each
    /// ack before issuing the next chunk (so sizing converges before
    /// concurrency is unleashed).
    pub fn in_buf_init(&self) -> bool {
        self.buf_init_remaining.load(Ordering::Relaxed) > 0
    }

    /// Record how long one chunk took to be acknowledged and adjust the
    /// shared size accordingly (§4.5 Adaptive chunk size).
    pub fn record_ack(&self, elapsed: Duration) {
        if self.buf_init_remaining.load(Ordering::Relaxed) > 0 {
            self.buf_init_remaining.fetch_sub(1, Ordering::Relaxed);
        }

        let current = self.size.load(Ordering::Relaxed);
        let next = if elapsed < DOUBLE_THRESHOLD {
            (current.saturating_mul(2)).min(self.max)
        } else if elapsed >= SHRINK_THRESHOLD {
            let secs = elapsed.as_secs().max(1);
            (current / secs).max(MIN_BUFFER_SIZE)
        } else {
            current
        };
        self.size.store(next, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_on_fast_chunk() {
        let sizer = ChunkSizer::new(4096, 1 << 20);
        sizer.record_ack(Duration::from_millis(100));
        assert_eq!(sizer.current(), 8192);
    }

    #[test]
    fn caps_at_max_buffer_size() {
        let sizer = ChunkSizer::new(1 << 19, 1 << 20);
        sizer.record_ack(Duration::from_millis(10));
        assert_eq!(sizer.current(), 1 << 20);
    }

    #[test]
    fn shrinks_proportionally_on_slow_chunk() {
        let sizer = ChunkSizer::new(1 << 16, 1 << 20);
        sizer.record_ack(Duration::from_secs(4));
        assert_eq!(sizer.current(), (1u64 << 16) / 4);
    }

    #[test]
    fn never_drops_below_floor() {
        let sizer = ChunkSizer::new(2048, 1 << 20);
        sizer.record_ack(Duration::from_secs(10));
        assert_eq!(sizer.current(), MIN_BUFFER_SIZE);
    }

    #[test]
    fn buf_init_phase_ends_after_four_acks() {
        let sizer = ChunkSizer::new(4096, 1 << 20);
        assert!(sizer.in_buf_init());
        for _ in 0..4 {
            sizer.record_ack(Duration::from_millis(100));
        }
        assert!(!sizer.in_buf_init());
    }
}
