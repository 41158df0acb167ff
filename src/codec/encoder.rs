//! Frame encoder
//!
//! Serializes one frame of samples into its big-endian wire form.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::BYTES_PER_SAMPLE;
use crate::error::CodecError;

/// Fixed-length frame encoder
pub struct FrameEncoder {
    frame_length: usize,
}

impl FrameEncoder {
    pub fn new(frame_length: usize) -> Self {
        Self { frame_length }
    }

    /// Encode exactly `frame_length` samples
    pub fn encode(&self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.frame_length {
            return Err(CodecError::Encode {
                expected: self.frame_length,
                actual: samples.len(),
            });
        }

        let mut buf = BytesMut::with_capacity(self.frame_bytes());
        for &sample in samples {
            buf.put_f32(sample);
        }
        Ok(buf.freeze())
    }

    /// Encoded size of one frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_length * BYTES_PER_SAMPLE
    }
}
