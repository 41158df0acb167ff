//! Frame queues between device callbacks and session loops
//!
//! The device side never blocks: capture offers whole frames to a bounded
//! channel and drops them when it is full, playback drains a lock-free ring
//! and writes silence on underrun.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drop and underrun counts shared between a device callback and its session
#[derive(Debug, Default)]
pub struct QueueStats {
    dropped: AtomicU64,
    underruns: AtomicU64,
}

impl QueueStats {
    /// Frames thrown away because the other side fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Times the output device found no frame and played silence
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Lock-free ring of decoded frames waiting for the output device
pub struct FrameQueue {
    queue: ArrayQueue<Vec<f32>>,
    stats: Arc<QueueStats>,
}

impl FrameQueue {
    /// Create a new queue holding up to `capacity` frames
    pub fn new(capacity: usize, stats: Arc<QueueStats>) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            stats,
        }
    }

    /// Push a frame into the queue.
    /// Returns false if the queue is full; the frame is dropped.
    pub fn push(&self, frame: Vec<f32>) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a frame, counting an underrun when empty
    pub fn pop(&self) -> Option<Vec<f32>> {
        let frame = self.queue.pop();
        if frame.is_none() {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }
}

/// Capture-side end of the device queue.
///
/// Device callbacks deliver buffers of whatever size the driver picks; the
/// sink regroups them into frames of exactly `frame_length` samples.
pub struct CaptureSink {
    tx: mpsc::Sender<Vec<f32>>,
    pending: Vec<f32>,
    frame_length: usize,
    stats: Arc<QueueStats>,
}

impl CaptureSink {
    pub fn new(tx: mpsc::Sender<Vec<f32>>, frame_length: usize, stats: Arc<QueueStats>) -> Self {
        Self {
            tx,
            pending: Vec::with_capacity(frame_length),
            frame_length,
            stats,
        }
    }

    /// Accumulate samples and offer every completed frame
    pub fn push_samples(&mut self, mut data: &[f32]) {
        while !data.is_empty() {
            let take = (self.frame_length - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_length {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_length));
                if self.tx.try_send(frame).is_err() {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Playback-side end of the device queue
pub struct PlaybackSource {
    queue: Arc<FrameQueue>,
    current: Vec<f32>,
    cursor: usize,
}

impl PlaybackSource {
    pub fn new(queue: Arc<FrameQueue>) -> Self {
        Self {
            queue,
            current: Vec::new(),
            cursor: 0,
        }
    }

    /// Fill an output buffer, padding with silence when no frame is ready
    pub fn fill(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.cursor >= self.current.len() {
                match self.queue.pop() {
                    Some(frame) => {
                        self.current = frame;
                        self.cursor = 0;
                    }
                    None => {
                        out[written..].fill(0.0);
                        return;
                    }
                }
            }

            let n = (out.len() - written).min(self.current.len() - self.cursor);
            out[written..written + n].copy_from_slice(&self.current[self.cursor..self.cursor + n]);
            written += n;
            self.cursor += n;
        }
    }
}
