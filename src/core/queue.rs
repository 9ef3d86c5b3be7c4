//! Bounded audio frame queue.
//!
//! Holds inbound audio while the upstream connection is still being
//! established. When the queue is full the oldest frame is evicted so memory
//! stays bounded; the most recent audio is always kept.

use bytes::Bytes;
use std::collections::VecDeque;

/// Default number of frames buffered before the upstream is ready.
///
/// Twilio sends 20ms mu-law frames, so 400 frames is roughly 8 seconds of audio.
pub const DEFAULT_QUEUE_CAPACITY: usize = 400;

/// FIFO ring buffer of audio frames with drop-oldest backpressure.
#[derive(Debug)]
pub struct AudioFrameQueue {
    frames: VecDeque<Bytes>,
    capacity: usize,
    dropped: u64,
}

impl Default for AudioFrameQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl AudioFrameQueue {
    /// Create a queue holding at most `capacity` frames.
    ///
    /// A capacity of zero is clamped to one so that the newest frame can
    /// always be retained.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append a frame to the tail, evicting the head first when full.
    ///
    /// Returns the evicted frame, if any.
    pub fn enqueue(&mut self, frame: Bytes) -> Option<Bytes> {
        let evicted = if self.frames.len() >= self.capacity {
            self.dropped += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Remove and return every buffered frame in arrival order.
    pub fn drain_in_order(&mut self) -> Vec<Bytes> {
        self.frames.drain(..).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of frames evicted by the drop-oldest policy.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u32) -> Bytes {
        Bytes::from(n.to_be_bytes().to_vec())
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut queue = AudioFrameQueue::default();
        for n in 0..10 {
            assert!(queue.enqueue(frame(n)).is_none());
        }

        let drained = queue.drain_in_order();
        assert_eq!(drained, (0..10).map(frame).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest_frame() {
        let mut queue = AudioFrameQueue::default();
        for n in 1..=400 {
            assert!(queue.enqueue(frame(n)).is_none());
        }
        assert_eq!(queue.len(), 400);

        let evicted = queue.enqueue(frame(401));
        assert_eq!(evicted, Some(frame(1)));
        assert_eq!(queue.len(), 400);
        assert_eq!(queue.dropped(), 1);

        let drained = queue.drain_in_order();
        assert_eq!(drained.first(), Some(&frame(2)));
        assert_eq!(drained.last(), Some(&frame(401)));
        assert_eq!(drained, (2..=401).map(frame).collect::<Vec<_>>());
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut queue = AudioFrameQueue::with_capacity(3);
        for n in 0..100 {
            queue.enqueue(frame(n));
            assert!(queue.len() <= 3);
        }
        assert_eq!(queue.dropped(), 97);
        assert_eq!(queue.drain_in_order(), vec![frame(97), frame(98), frame(99)]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut queue = AudioFrameQueue::with_capacity(0);
        assert_eq!(queue.capacity(), 1);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        assert_eq!(queue.drain_in_order(), vec![frame(2)]);
    }

    #[test]
    fn test_drain_twice_returns_empty() {
        let mut queue = AudioFrameQueue::default();
        queue.enqueue(frame(7));
        assert_eq!(queue.drain_in_order().len(), 1);
        assert!(queue.drain_in_order().is_empty());
    }
}
