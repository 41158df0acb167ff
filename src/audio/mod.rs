//! Audio device capability
//!
//! A backend opens a capture or playback stream bound to one end of a frame
//! queue and hands back a [`DeviceHandle`]. Dropping the handle stops the
//! stream and releases the device.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod mock;
pub mod playback;
pub mod tone;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{AudioConfig, BackendKind, SessionConfig};
use crate::error::AudioError;

pub use buffer::{CaptureSink, FrameQueue, PlaybackSource, QueueStats};
pub use device::{list_devices, AudioDeviceInfo};
pub use mock::{MockBackend, MockDevice};
pub use tone::ToneBackend;

/// Stream shape requested from a backend
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples per frame
    pub frame_length: usize,
    pub open_timeout: Duration,
}

impl StreamParams {
    pub fn new(audio: &AudioConfig, session: &SessionConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            frame_length: audio.frame_length,
            open_timeout: session.device_open_timeout(),
        }
    }
}

/// Capture/playback device layer
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open a capture stream that feeds `sink` once per device period
    fn open_capture(&self, params: &StreamParams, sink: CaptureSink) -> Result<DeviceHandle, AudioError>;

    /// Open a playback stream that drains `source` once per device period
    fn open_playback(
        &self,
        params: &StreamParams,
        source: PlaybackSource,
    ) -> Result<DeviceHandle, AudioError>;
}

pub type SharedBackend = Arc<dyn AudioBackend>;

/// Build the backend selected in the config
pub fn backend_from_config(config: &AudioConfig) -> SharedBackend {
    match config.backend {
        BackendKind::Cpal => Arc::new(device::CpalBackend::new(
            config.input_device.clone(),
            config.output_device.clone(),
        )),
        BackendKind::Tone => Arc::new(ToneBackend::new(config.tone_frequency)),
    }
}

/// Owns an open device stream; stops it on drop
pub struct DeviceHandle {
    label: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceHandle {
    pub fn new(label: impl Into<String>, running: Arc<AtomicBool>) -> Self {
        Self {
            label: label.into(),
            running,
            thread: None,
            on_stop: None,
        }
    }

    fn threaded(label: String, running: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            label,
            running,
            thread: Some(thread),
            on_stop: None,
        }
    }

    /// Run `f` once when the device is stopped
    pub fn on_stop(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(f));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the stream and wait for its thread to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(f) = self.on_stop.take() {
            f();
        }

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("Device thread {} panicked", self.label);
            }
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How often device threads check their running flag
const DEVICE_TICK: Duration = Duration::from_millis(10);

/// Open a device on a dedicated thread.
///
/// `build` runs on the new thread (cpal streams cannot move between threads)
/// and returns a tick closure that keeps the stream alive; the tick runs every
/// [`DEVICE_TICK`] until the handle is stopped. Open failures are reported
/// back to the caller within `open_timeout`.
pub(crate) fn spawn_device_thread<B, T>(
    name: String,
    open_timeout: Duration,
    build: B,
) -> Result<DeviceHandle, AudioError>
where
    B: FnOnce() -> Result<T, AudioError> + Send + 'static,
    T: FnMut() + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let running_for_loop = running.clone();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);

    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let mut tick = match build() {
                Ok(tick) => {
                    let _ = ready_tx.send(Ok(()));
                    tick
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while running_for_loop.load(Ordering::Relaxed) {
                tick();
                thread::sleep(DEVICE_TICK);
            }
            // Stream is dropped here, releasing the device
        })
        .map_err(|e| AudioError::DeviceOpen(e.to_string()))?;

    match ready_rx.recv_timeout(open_timeout) {
        Ok(Ok(())) => Ok(DeviceHandle::threaded(name, running, handle)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            running.store(false, Ordering::SeqCst);
            Err(AudioError::DeviceOpen(format!(
                "{name} did not open within {open_timeout:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_device_thread_reports_open_failure() {
        let result = spawn_device_thread::<_, fn()>("failing".into(), Duration::from_secs(1), || {
            Err(AudioError::DeviceNotFound("no such device".into()))
        });
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_device_thread_times_out() {
        let result = spawn_device_thread::<_, fn()>("slow".into(), Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(200));
            Ok(|| {})
        });
        assert!(matches!(result, Err(AudioError::DeviceOpen(_))));
    }

    #[test]
    fn test_device_handle_stops_thread() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let mut handle = spawn_device_thread("ticking".into(), Duration::from_secs(1), move || {
            Ok(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());

        let after_stop = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
        assert!(after_stop > 0);
    }
}
