//! Audio capture from input devices
//!
//! Each capture stream lives on its own thread; the cpal callback regroups
//! driver buffers into frames and offers them to the session's queue.

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::audio::device::{input_device, stream_config};
use crate::audio::{spawn_device_thread, CaptureSink, DeviceHandle, StreamParams};
use crate::error::AudioError;

/// Open an input stream on the named (or default) device
pub fn open_input_stream(
    device_name: Option<String>,
    params: &StreamParams,
    mut sink: CaptureSink,
) -> Result<DeviceHandle, AudioError> {
    let config = stream_config(params);
    let label = format!("capture-{}", device_name.as_deref().unwrap_or("default"));

    spawn_device_thread(label, params.open_timeout, move || {
        let device = input_device(device_name.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sink.push_samples(data);
            },
            move |err| {
                tracing::warn!("Capture stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;

        tracing::info!(
            "Capture started on {} ({} Hz, {} ch)",
            name,
            config.sample_rate.0,
            config.channels
        );

        Ok(move || {
            let _stream = &stream;
        })
    })
}
