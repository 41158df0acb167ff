//! In-process device for driving sessions without hardware
//!
//! Capture frames are injected with [`MockDevice::push_frame`] and played
//! frames are read back with [`MockDevice::pull`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::{AudioBackend, CaptureSink, DeviceHandle, PlaybackSource, StreamParams};
use crate::error::AudioError;

#[derive(Clone, Default)]
pub struct MockBackend {
    device: Arc<MockDevice>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for feeding and inspecting the device
    pub fn device(&self) -> Arc<MockDevice> {
        self.device.clone()
    }
}

#[derive(Default)]
pub struct MockDevice {
    fail_open: AtomicBool,
    next_id: AtomicU64,
    captures: Mutex<Vec<(u64, CaptureSink)>>,
    playbacks: Mutex<Vec<(u64, PlaybackSource)>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MockDevice {
    /// Make every following open fail as if the device were unavailable
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Deliver samples to every open capture stream.
    /// Returns false when no capture stream is open.
    pub fn push_frame(&self, samples: &[f32]) -> bool {
        let mut captures = self.captures.lock();
        for (_, sink) in captures.iter_mut() {
            sink.push_samples(samples);
        }
        !captures.is_empty()
    }

    /// Pull `n` samples from the most recently opened playback stream
    pub fn pull(&self, n: usize) -> Option<Vec<f32>> {
        let mut playbacks = self.playbacks.lock();
        let (_, source) = playbacks.last_mut()?;
        let mut out = vec![0.0; n];
        source.fill(&mut out);
        Some(out)
    }

    pub fn is_capturing(&self) -> bool {
        !self.captures.lock().is_empty()
    }

    pub fn is_playing(&self) -> bool {
        !self.playbacks.lock().is_empty()
    }

    /// Streams opened so far
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams released so far
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<u64, AudioError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceOpen("mock device unavailable".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn open_capture(&self, _params: &StreamParams, sink: CaptureSink) -> Result<DeviceHandle, AudioError> {
        let id = self.device.check_open()?;
        self.device.captures.lock().push((id, sink));

        let device = self.device.clone();
        Ok(DeviceHandle::new("mock-capture", Arc::new(AtomicBool::new(true))).on_stop(move || {
            device.captures.lock().retain(|(open, _)| *open != id);
            device.closed.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn open_playback(
        &self,
        _params: &StreamParams,
        source: PlaybackSource,
    ) -> Result<DeviceHandle, AudioError> {
        let id = self.device.check_open()?;
        self.device.playbacks.lock().push((id, source));

        let device = self.device.clone();
        Ok(DeviceHandle::new("mock-playback", Arc::new(AtomicBool::new(true))).on_stop(move || {
            device.playbacks.lock().retain(|(open, _)| *open != id);
            device.closed.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
