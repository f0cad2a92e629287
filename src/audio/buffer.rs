//! Lock-free sample ring between network threads and device callbacks
//!
//! Single-producer single-consumer: the receive loop pushes decoded samples,
//! the cpal output callback pops them. The callback never blocks; missing
//! samples are counted as underruns and played as silence. Producers wait
//! for room instead of overwriting, so nothing is ever lost on push.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free ring of interleaved f32 samples
pub struct SampleRing {
    queue: ArrayQueue<f32>,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    /// Create a new ring with room for `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push as many of `samples` as fit, returning how many were taken
    pub fn push_slice(&self, samples: &[f32]) -> usize {
        for (i, &sample) in samples.iter().enumerate() {
            if self.queue.push(sample).is_err() {
                return i;
            }
        }
        samples.len()
    }

    /// Pop a sample, counting an underrun when empty
    pub fn pop(&self) -> Option<f32> {
        match self.queue.pop() {
            Some(sample) => Some(sample),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Fill `out` from the ring, padding with silence on underrun
    pub fn fill(&self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.pop().unwrap_or(0.0);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;

pub fn create_shared_ring(capacity: usize) -> SharedSampleRing {
    Arc::new(SampleRing::new(capacity))
}
