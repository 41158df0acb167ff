//! # AudioLAN
//!
//! Relays a live audio capture feed from one host to listeners on the LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              SERVER PC                               │
//! │                                                                      │
//! │   GET /connect ──► Handshake (handshake::server)                     │
//! │                          │                                           │
//! │                          ▼                                           │
//! │   ┌──────────────────────────────────────────────────────────────┐   │
//! │   │           Session Registry (session::registry)               │   │
//! │   │   peer 10.0.0.7 ─► Session    peer 10.0.0.9 ─► Session        │   │
//! │   └──────────────────────────────┬───────────────────────────────┘   │
//! │                                  │ one task per session              │
//! │   ┌──────────┐   bounded   ┌─────▼─────┐   ┌───────────┐             │
//! │   │ Capture  │──channel───►│ Transport │──►│  Failure  │             │
//! │   │ callback │   frames    │   loop    │   │  Tracker  │             │
//! │   └──────────┘             └─────┬─────┘   └───────────┘             │
//! │                                  │ [f32 BE] x frame_length           │
//! └──────────────────────────────────┼───────────────────────────────────┘
//!                                    │ WebSocket message / UDP datagram
//!                                    ▼
//! ┌──────────────────────────────────┼───────────────────────────────────┐
//! │                              CLIENT PC                               │
//! │                            ┌─────▼─────┐   lock-free  ┌──────────┐   │
//! │                            │ Transport │───queue─────►│ Playback │   │
//! │                            │   loop    │   frames     │ callback │   │
//! │                            └───────────┘              └──────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handshake;
pub mod network;
pub mod peer;
pub mod session;

pub use error::{Error, Result};
pub use peer::PeerIdentity;

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default samples per frame (100ms of mono audio at the default rate)
    pub const DEFAULT_FRAME_LENGTH: usize = 4410;

    /// Size of one encoded sample on the wire
    pub const BYTES_PER_SAMPLE: usize = 4;

    /// Default port for the handshake server
    pub const DEFAULT_PORT: u16 = 3456;

    /// Default port listeners receive UDP frames on
    pub const DEFAULT_UDP_PORT: u16 = 3456;

    /// Failures tolerated within one failure window
    pub const DEFAULT_FAILURE_CAPACITY: usize = 5;

    /// How long a recorded failure counts against a session
    pub const DEFAULT_FAILURE_WINDOW_MS: u64 = 10_000;

    /// Frames buffered between the device callback and the transport loop
    pub const DEFAULT_QUEUE_FRAMES: usize = 4;

    /// Largest UDP payload
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;
}
