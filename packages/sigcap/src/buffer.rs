// Lock-free chunk hand-off between a producer and its persistence writer
//
// A stream buffer is split into a sending and a receiving half. Neither half
// is `Clone`, so a buffer has exactly one producer and exactly one consumer by
// construction. The queue is unbounded: pushing never blocks and never drops a
// chunk. Depth above the configured high-water mark is only reported.

use crate::types::{SampleChunk, StreamKind};
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Metrics for buffer monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BufferMetrics {
    pub chunks_pushed: u64,
    pub chunks_drained: u64,
    pub samples_pushed: u64,
    pub current_depth: usize,
    pub peak_depth: usize,
}

struct Shared {
    kind: StreamKind,
    queue: SegQueue<SampleChunk>,
    high_water: usize,
    high_water_reported: AtomicBool,

    // Atomic counters for lock-free metrics
    chunks_pushed: AtomicU64,
    chunks_drained: AtomicU64,
    samples_pushed: AtomicU64,
    peak_depth: AtomicUsize,
}

impl Shared {
    fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            chunks_pushed: self.chunks_pushed.load(Ordering::Relaxed),
            chunks_drained: self.chunks_drained.load(Ordering::Relaxed),
            samples_pushed: self.samples_pushed.load(Ordering::Relaxed),
            current_depth: self.queue.len(),
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
        }
    }
}

/// Create the two halves of a stream buffer
pub fn stream_buffer(kind: StreamKind, high_water: usize) -> (ChunkSender, ChunkReceiver) {
    let shared = Arc::new(Shared {
        kind,
        queue: SegQueue::new(),
        high_water: high_water.max(1),
        high_water_reported: AtomicBool::new(false),
        chunks_pushed: AtomicU64::new(0),
        chunks_drained: AtomicU64::new(0),
        samples_pushed: AtomicU64::new(0),
        peak_depth: AtomicUsize::new(0),
    });

    (
        ChunkSender {
            shared: Arc::clone(&shared),
        },
        ChunkReceiver { shared },
    )
}

/// Producer half
pub struct ChunkSender {
    shared: Arc<Shared>,
}

impl ChunkSender {
    /// Queue a chunk as a single unit. Never blocks.
    pub fn push(&self, chunk: SampleChunk) {
        let samples = chunk.len() as u64;
        self.shared.queue.push(chunk);
        self.shared.chunks_pushed.fetch_add(1, Ordering::Relaxed);
        self.shared.samples_pushed.fetch_add(samples, Ordering::Relaxed);

        let depth = self.shared.queue.len();
        self.shared.peak_depth.fetch_max(depth, Ordering::Relaxed);

        if depth > self.shared.high_water
            && !self.shared.high_water_reported.swap(true, Ordering::Relaxed)
        {
            log::warn!(
                "{} buffer holds {} chunks (high-water mark {}); persistence is falling behind",
                self.shared.kind,
                depth,
                self.shared.high_water
            );
        }
    }

    pub fn metrics(&self) -> BufferMetrics {
        self.shared.metrics()
    }
}

/// Consumer half
pub struct ChunkReceiver {
    shared: Arc<Shared>,
}

impl ChunkReceiver {
    /// Take every chunk queued at the time of the call, oldest first.
    ///
    /// Chunks pushed concurrently with the drain are left for the next call.
    pub fn drain(&mut self) -> Vec<SampleChunk> {
        let queued = self.shared.queue.len();
        let mut chunks = Vec::with_capacity(queued);

        for _ in 0..queued {
            match self.shared.queue.pop() {
                Some(chunk) => chunks.push(chunk),
                None => break,
            }
        }

        self.shared
            .chunks_drained
            .fetch_add(chunks.len() as u64, Ordering::Relaxed);

        if self.shared.queue.len() <= self.shared.high_water / 2 {
            self.shared
                .high_water_reported
                .store(false, Ordering::Relaxed);
        }

        chunks
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// True while the sending half has not been dropped
    pub fn has_producer(&self) -> bool {
        Arc::strong_count(&self.shared) > 1
    }

    pub fn metrics(&self) -> BufferMetrics {
        self.shared.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_chunk(seq: u64, samples: usize) -> SampleChunk {
        SampleChunk {
            local_timestamps: (0..samples).map(|i| seq as f64 + i as f64 * 0.01).collect(),
            values: (0..samples).map(|_| vec![seq as f64]).collect(),
        }
    }

    #[test]
    fn test_drain_preserves_order() {
        let (tx, mut rx) = stream_buffer(StreamKind::Eeg, 100);

        tx.push(create_test_chunk(1, 2));
        tx.push(create_test_chunk(2, 3));
        tx.push(create_test_chunk(3, 1));

        let chunks = rx.drain();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].values[0][0], 1.0);
        assert_eq!(chunks[1].values[0][0], 2.0);
        assert_eq!(chunks[2].values[0][0], 3.0);
        assert!(rx.is_empty());
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_never_drops_past_high_water() {
        let (tx, mut rx) = stream_buffer(StreamKind::Ppg, 2);
        for seq in 0..10 {
            tx.push(create_test_chunk(seq, 1));
        }
        assert_eq!(rx.len(), 10);
        assert_eq!(rx.drain().len(), 10);
    }

    #[test]
    fn test_metrics() {
        let (tx, mut rx) = stream_buffer(StreamKind::Acc, 100);
        tx.push(create_test_chunk(1, 4));
        tx.push(create_test_chunk(2, 6));

        let metrics = tx.metrics();
        assert_eq!(metrics.chunks_pushed, 2);
        assert_eq!(metrics.samples_pushed, 10);
        assert_eq!(metrics.current_depth, 2);
        assert_eq!(metrics.peak_depth, 2);

        rx.drain();
        let metrics = rx.metrics();
        assert_eq!(metrics.chunks_drained, 2);
        assert_eq!(metrics.current_depth, 0);
        assert_eq!(metrics.peak_depth, 2);
    }

    #[test]
    fn test_concurrent_producer_loses_nothing() {
        let (tx, mut rx) = stream_buffer(StreamKind::Eeg, 1000);
        let producer = std::thread::spawn(move || {
            for seq in 0..500 {
                tx.push(create_test_chunk(seq, 3));
            }
        });

        let mut received = Vec::new();
        while rx.has_producer() || !rx.is_empty() {
            received.extend(rx.drain());
            std::thread::yield_now();
        }
        producer.join().unwrap();
        received.extend(rx.drain());

        assert_eq!(received.len(), 500);
        assert!(received
            .windows(2)
            .all(|pair| pair[0].values[0][0] < pair[1].values[0][0]));
    }
}
