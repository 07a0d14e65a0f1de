//! Frames and lock-free handoff queues
//!
//! The audio callbacks never allocate on the steady path: capture copies into
//! buffers recycled through a [`FramePool`], and the receive side hands
//! packets to playout through a fixed-capacity [`RingBuffer`].

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock::FrameClock;

/// One frame of interleaved PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32, -1.0..=1.0)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Position in the stream, increasing by one per frame
    pub index: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, index: u64) -> Self {
        Self {
            samples,
            channels,
            index,
        }
    }

    /// A zeroed frame with the clock's geometry
    pub fn silence(clock: &FrameClock) -> Self {
        Self::new(vec![0.0; clock.samples_per_frame()], clock.channels, 0)
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn fill_silence(&mut self) {
        self.samples.fill(0.0);
    }

    /// Multiply every sample by `gain`
    pub fn apply_gain(&mut self, gain: f32) {
        if (gain - 1.0).abs() > f32::EPSILON {
            for sample in &mut self.samples {
                *sample *= gain;
            }
        }
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

/// Lock-free bounded queue with overflow/underrun accounting
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push an item; hands it back if the buffer is full
    pub fn push(&self, item: T) -> Result<(), T> {
        self.queue.push(item).map_err(|item| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            item
        })
    }

    /// Push, displacing the oldest item when full. Returns the displaced item.
    pub fn force_push(&self, item: T) -> Option<T> {
        let displaced = self.queue.force_push(item);
        if displaced.is_some() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    /// Pop an item, counting an underrun if empty
    pub fn pop(&self) -> Option<T> {
        match self.queue.pop() {
            Some(item) => Some(item),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Try to pop without counting underrun
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer<T> = Arc<RingBuffer<T>>;

/// Pre-sized sample buffers shared between capture and encoder
pub struct FramePool {
    free: RingBuffer<Vec<f32>>,
    frame_len: usize,
}

impl FramePool {
    /// Pool of `count` buffers of `frame_len` samples each
    pub fn new(count: usize, frame_len: usize) -> Self {
        let free = RingBuffer::new(count);
        for _ in 0..count {
            let _ = free.push(vec![0.0; frame_len]);
        }
        Self { free, frame_len }
    }

    /// Take a buffer; allocates only when the pool has run dry
    pub fn take(&self) -> Vec<f32> {
        self.free
            .try_pop()
            .unwrap_or_else(|| vec![0.0; self.frame_len])
    }

    /// Return a buffer. Wrong-sized or surplus buffers are dropped.
    pub fn recycle(&self, buffer: Vec<f32>) {
        if buffer.len() == self.frame_len {
            let _ = self.free.push(buffer);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(4);

        let frame1 = AudioFrame::new(vec![0.0; 480], 2, 0);
        let frame2 = AudioFrame::new(vec![1.0; 480], 2, 1);

        assert!(buffer.push(frame1).is_ok());
        assert!(buffer.push(frame2).is_ok());
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop().unwrap().index, 0);
        assert_eq!(buffer.pop().unwrap().index, 1);

        assert!(buffer.is_empty());
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_ring_buffer_overflow() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.push(1).is_ok());
        assert!(buffer.push(2).is_ok());
        assert_eq!(buffer.push(3), Err(3));
        assert_eq!(buffer.overflow_count(), 1);

        // Freshness first: the oldest item makes room
        assert_eq!(buffer.force_push(4), Some(1));
        assert_eq!(buffer.try_pop(), Some(2));
        assert_eq!(buffer.try_pop(), Some(4));
        assert_eq!(buffer.overflow_count(), 2);
    }

    #[test]
    fn test_frame_pool_recycles() {
        let pool = FramePool::new(2, 8);
        let a = pool.take();
        let b = pool.take();
        assert_eq!(pool.available(), 0);

        // Dry pool still hands out a correctly sized buffer
        let c = pool.take();
        assert_eq!(c.len(), 8);

        pool.recycle(a);
        pool.recycle(b);
        pool.recycle(c); // surplus, dropped
        pool.recycle(vec![0.0; 3]); // wrong size, dropped
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_frame_helpers() {
        let clock = FrameClock::default();
        let mut frame = AudioFrame::silence(&clock);
        assert_eq!(frame.samples_per_channel(), 960);
        assert_eq!(frame.peak(), 0.0);

        frame.samples[10] = -0.8;
        frame.apply_gain(0.5);
        assert!((frame.peak() - 0.4).abs() < 1e-6);

        frame.fill_silence();
        assert_eq!(frame.peak(), 0.0);
    }
}
