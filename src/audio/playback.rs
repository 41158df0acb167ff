//! Audio playback to output devices

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::audio::device::{output_device, stream_config};
use crate::audio::{spawn_device_thread, DeviceHandle, PlaybackSource, StreamParams};
use crate::error::AudioError;

/// Open an output stream on the named (or default) device.
///
/// The output callback never blocks: when no decoded frame is queued it
/// plays silence.
pub fn open_output_stream(
    device_name: Option<String>,
    params: &StreamParams,
    mut source: PlaybackSource,
) -> Result<DeviceHandle, AudioError> {
    let config = stream_config(params);
    let label = format!("playback-{}", device_name.as_deref().unwrap_or("default"));

    spawn_device_thread(label, params.open_timeout, move || {
        let device = output_device(device_name.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let stream = device.build_output_stream(
            &config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                source.fill(out);
            },
            move |err| {
                tracing::warn!("Playback stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;

        tracing::info!("Playback started on {}", name);

        Ok(move || {
            let _stream = &stream;
        })
    })
}
