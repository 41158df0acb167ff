//! cpal device enumeration and the cpal-backed [`AudioBackend`]

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::audio::{capture, playback, AudioBackend, CaptureSink, DeviceHandle, PlaybackSource, StreamParams};
use crate::error::AudioError;

/// Description of an audio device, for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let (sample_rates, channels) = capabilities(&device, true);
            devices.push(AudioDeviceInfo {
                id: format!("input:{name}"),
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                sample_rates,
                channels,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let is_default = default_output_name.as_ref() == Some(&name);

            // Duplex devices show up once
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
                continue;
            }

            let (sample_rates, channels) = capabilities(&device, false);
            devices.push(AudioDeviceInfo {
                id: format!("output:{name}"),
                name,
                is_input: false,
                is_output: true,
                is_default,
                sample_rates,
                channels,
            });
        }
    }

    devices
}

fn capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device.supported_input_configs().map(|c| c.collect()).unwrap_or_default()
    } else {
        device.supported_output_configs().map(|c| c.collect()).unwrap_or_default()
    };

    let mut rates = Vec::new();
    let mut chans = Vec::new();
    for config in configs {
        for rate in [22050u32, 44100, 48000, 88200, 96000] {
            let sr = cpal::SampleRate(rate);
            if sr >= config.min_sample_rate() && sr <= config.max_sample_rate() && !rates.contains(&rate) {
                rates.push(rate);
            }
        }
        if !chans.contains(&config.channels()) {
            chans.push(config.channels());
        }
    }

    rates.sort_unstable();
    chans.sort_unstable();
    (rates, chans)
}

/// Find an input device by name, or the default input when `name` is None
pub fn input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(name) => find_by_name(host.input_devices()?, name),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
    }
}

/// Find an output device by name, or the default output when `name` is None
pub fn output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(name) => find_by_name(host.output_devices()?, name),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
    }
}

fn find_by_name(
    devices: impl Iterator<Item = cpal::Device>,
    name: &str,
) -> Result<cpal::Device, AudioError> {
    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

/// Stream config for the requested shape
pub(crate) fn stream_config(params: &StreamParams) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Backend over the host's real audio devices
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open_capture(&self, params: &StreamParams, sink: CaptureSink) -> Result<DeviceHandle, AudioError> {
        capture::open_input_stream(self.input_device.clone(), params, sink)
    }

    fn open_playback(
        &self,
        params: &StreamParams,
        source: PlaybackSource,
    ) -> Result<DeviceHandle, AudioError> {
        playback::open_output_stream(self.output_device.clone(), params, source)
    }
}
