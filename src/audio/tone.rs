//! Sine tone backend
//!
//! Streams a generated tone instead of a microphone, and plays received audio
//! into nothing at real-time pace. Handy on machines without audio hardware.

use std::f32::consts::TAU;
use std::time::Instant;

use crate::audio::{spawn_device_thread, AudioBackend, CaptureSink, DeviceHandle, PlaybackSource, StreamParams};
use crate::error::AudioError;

pub struct ToneBackend {
    frequency: f32,
    amplitude: f32,
}

impl ToneBackend {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            amplitude: 0.25,
        }
    }
}

/// Samples per channel that should have elapsed since `start`
fn due_samples(start: Instant, sample_rate: u32) -> u64 {
    (start.elapsed().as_secs_f64() * sample_rate as f64) as u64
}

impl AudioBackend for ToneBackend {
    fn name(&self) -> &str {
        "tone"
    }

    fn open_capture(&self, params: &StreamParams, mut sink: CaptureSink) -> Result<DeviceHandle, AudioError> {
        let sample_rate = params.sample_rate;
        let channels = params.channels as usize;
        let step = TAU * self.frequency / sample_rate as f32;
        let amplitude = self.amplitude;

        spawn_device_thread(
            format!("tone-{}hz", self.frequency),
            params.open_timeout,
            move || {
                let start = Instant::now();
                let mut produced = 0u64;
                let mut phase = 0.0f32;
                let mut buf = Vec::new();

                Ok(move || {
                    let due = due_samples(start, sample_rate);
                    if due <= produced {
                        return;
                    }

                    buf.clear();
                    for _ in produced..due {
                        let value = phase.sin() * amplitude;
                        buf.extend(std::iter::repeat(value).take(channels));
                        phase = (phase + step) % TAU;
                    }
                    produced = due;
                    sink.push_samples(&buf);
                })
            },
        )
    }

    fn open_playback(
        &self,
        params: &StreamParams,
        mut source: PlaybackSource,
    ) -> Result<DeviceHandle, AudioError> {
        let sample_rate = params.sample_rate;
        let channels = params.channels as usize;

        spawn_device_thread("tone-sink".to_string(), params.open_timeout, move || {
            let start = Instant::now();
            let mut consumed = 0u64;
            let mut scratch = Vec::new();

            Ok(move || {
                let due = due_samples(start, sample_rate);
                if due <= consumed {
                    return;
                }
                scratch.resize((due - consumed) as usize * channels, 0.0);
                source.fill(&mut scratch);
                consumed = due;
            })
        })
    }
}
