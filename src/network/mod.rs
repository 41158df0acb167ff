//! Frame transports
//!
//! A session sees its connection as two halves: a [`FrameSink`] it writes
//! encoded frames to and a [`FrameSource`] it reads them from. One frame is
//! one transport message (a WebSocket binary message or a UDP datagram).

pub mod memory;
pub mod udp;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::TransportError;

pub use udp::{create_socket, UdpTransport};

/// URL of a handshake endpoint for a server address, with or without a port
pub fn endpoint_url(scheme: &str, address: &str, default_port: u16, path: &str) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return format!("{scheme}://{address}{path}");
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            format!("{scheme}://{address}{path}")
        }
        _ if address.contains(':') => format!("{scheme}://[{address}]:{default_port}{path}"),
        _ => format!("{scheme}://{address}:{default_port}{path}"),
    }
}

/// Write half of a frame transport
#[async_trait]
pub trait FrameSink: Send {
    /// Send one encoded frame as a single message
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the connection; errors are not interesting at this point
    async fn close(&mut self);
}

/// Read half of a frame transport
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame. `Ok(None)` means the remote closed.
    ///
    /// Must be cancel safe: sessions race it against other events.
    async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// One established connection to a peer
pub struct Transport {
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
    kind: &'static str,
}

impl Transport {
    pub fn new(
        kind: &'static str,
        sink: impl FrameSink + 'static,
        source: impl FrameSource + 'static,
    ) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
            kind,
        }
    }

    /// Short name of the underlying transport, for logs
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn into_parts(self) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        (self.sink, self.source)
    }

    pub async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.sink.send_frame(frame).await
    }

    pub async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.source.recv_frame().await
    }

    pub async fn close(&mut self) {
        self.sink.close().await
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("kind", &self.kind).finish()
    }
}
