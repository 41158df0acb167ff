//! Audio frame codec
//!
//! A frame on the wire is exactly `frame_length` samples, each a 4-byte
//! big-endian IEEE-754 float, with no header. Frame boundaries are the
//! transport's message boundaries.

pub mod decoder;
pub mod encoder;

pub use decoder::FrameDecoder;
pub use encoder::FrameEncoder;

/// True when every sample is zero, so the frame can be skipped
#[inline]
pub fn is_silent(samples: &[f32]) -> bool {
    samples.iter().all(|&s| s == 0.0)
}
