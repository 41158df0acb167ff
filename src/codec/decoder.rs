//! Frame decoder

use bytes::Buf;

use crate::constants::BYTES_PER_SAMPLE;
use crate::error::CodecError;

/// Fixed-length frame decoder
pub struct FrameDecoder {
    frame_length: usize,
}

impl FrameDecoder {
    pub fn new(frame_length: usize) -> Self {
        Self { frame_length }
    }

    /// Decode one wire frame into `frame_length` samples
    pub fn decode(&self, mut data: &[u8]) -> Result<Vec<f32>, CodecError> {
        let expected = self.frame_length * BYTES_PER_SAMPLE;
        if data.len() != expected {
            return Err(CodecError::Decode {
                expected,
                actual: data.len(),
            });
        }

        let mut samples = Vec::with_capacity(self.frame_length);
        while data.has_remaining() {
            samples.push(data.get_f32());
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameEncoder;

    #[test]
    fn test_sine_roundtrip() {
        let encoder = FrameEncoder::new(441);
        let decoder = FrameDecoder::new(441);

        let samples: Vec<f32> = (0..441)
            .map(|i| (i as f32 / 44100.0 * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5)
            .collect();

        let encoded = encoder.encode(&samples).unwrap();
        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let decoder = FrameDecoder::new(4);
        let err = decoder.decode(&[0u8; 15]).unwrap_err();
        assert_eq!(err, CodecError::Decode { expected: 16, actual: 15 });

        let err = decoder.decode(&[0u8; 20]).unwrap_err();
        assert_eq!(err, CodecError::Decode { expected: 16, actual: 20 });
    }
}
