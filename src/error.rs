//! Error types for the audio relay

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The capture or playback capability could not be opened
    #[error("Failed to open device: {0}")]
    DeviceOpen(String),
}

/// Frame codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Cannot encode frame: expected {expected} samples, got {actual}")]
    Encode { expected: usize, actual: usize },

    #[error("Cannot decode frame: expected {expected} bytes, got {actual}")]
    Decode { expected: usize, actual: usize },
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Frame too large for transport: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Transport closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Streaming session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {0} was already started")]
    AlreadyStarted(uuid::Uuid),

    #[error("Session {0} is stopped")]
    Stopped(uuid::Uuid),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::DeviceNotFound(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::DeviceOpen(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::DeviceOpen(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
