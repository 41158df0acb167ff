//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory. Every section
//! falls back to defaults, so a partial file is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub session: SessionConfig,
}

/// Which device layer to stream from/to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Real capture/playback devices through cpal
    #[default]
    Cpal,
    /// Generated sine tone, no hardware needed
    Tone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: BackendKind,
    /// Input device name, default device when unset
    pub input_device: Option<String>,
    /// Output device name, default device when unset
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples per frame, across all channels
    pub frame_length: usize,
    pub tone_frequency: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpal,
            input_device: None,
            output_device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_length: DEFAULT_FRAME_LENGTH,
            tone_frequency: 440.0,
        }
    }
}

impl AudioConfig {
    /// Wall-clock duration of one frame
    pub fn frame_period(&self) -> Duration {
        let per_channel = self.frame_length / self.channels.max(1) as usize;
        Duration::from_secs_f64(per_channel as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_length * BYTES_PER_SAMPLE
    }
}

/// Byte transport carrying frames after the handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// One binary WebSocket message per frame on the handshake connection
    #[default]
    Websocket,
    /// One datagram per frame, sent to the peer's UDP port
    Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub transport: TransportKind,
    /// Port listeners receive UDP frames on
    pub udp_port: u16,
    /// Socket send/receive buffer size for UDP, bytes
    pub socket_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            transport: TransportKind::Websocket,
            udp_port: DEFAULT_UDP_PORT,
            socket_buffer_size: 1 << 20,
        }
    }
}

/// Per-session timing and failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub failure_capacity: usize,
    pub failure_window_ms: u64,
    /// Longest wait for one inbound frame before re-checking the loop
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Bound on waiting for an evicted session to reach `Stopped`
    pub stop_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub device_open_timeout_ms: u64,
    /// Frames buffered between device callback and transport loop
    pub queue_frames: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            failure_capacity: DEFAULT_FAILURE_CAPACITY,
            failure_window_ms: DEFAULT_FAILURE_WINDOW_MS,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            stop_timeout_ms: 500,
            close_timeout_ms: 250,
            device_open_timeout_ms: 2000,
            queue_frames: DEFAULT_QUEUE_FRAMES,
        }
    }
}

impl SessionConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn device_open_timeout(&self) -> Duration {
        Duration::from_millis(self.device_open_timeout_ms)
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "audiolan").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the default location; a missing file yields defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        tracing::info!("Loading config from {}", path.display());
        Self::load(&path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.channels == 0 {
            return Err(Error::Config("channels must be at least 1".into()));
        }
        if audio.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if audio.frame_length == 0 {
            return Err(Error::Config("frame_length must be positive".into()));
        }
        if audio.frame_length % audio.channels as usize != 0 {
            return Err(Error::Config(format!(
                "frame_length {} is not a multiple of {} channels",
                audio.frame_length, audio.channels
            )));
        }
        if self.network.transport == TransportKind::Udp && audio.frame_bytes() > MAX_DATAGRAM_SIZE {
            return Err(Error::Config(format!(
                "a {}-byte frame does not fit in one UDP datagram",
                audio.frame_bytes()
            )));
        }
        if self.session.failure_capacity == 0 {
            return Err(Error::Config("failure_capacity must be at least 1".into()));
        }
        if self.session.queue_frames == 0 {
            return Err(Error::Config("queue_frames must be at least 1".into()));
        }
        Ok(())
    }
}
