//! UDP transport
//!
//! One datagram per frame on a connected socket. UDP has no close, so the
//! source never reports one; a vanished peer shows up as send or receive
//! errors (ICMP port unreachable) and is left to the failure tracker.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::TransportError;
use crate::network::{FrameSink, FrameSource, Transport};

/// Create a non-blocking UDP socket with enlarged buffers, bound to `bind_addr`
pub fn create_socket(bind_addr: SocketAddr, buffer_size: usize) -> Result<UdpSocket, TransportError> {
    let domain = if bind_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;

    if let Err(e) = socket.set_send_buffer_size(buffer_size) {
        tracing::debug!("Could not set send buffer size: {}", e);
    }
    if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
        tracing::debug!("Could not set receive buffer size: {}", e);
    }

    socket
        .set_reuse_address(true)
        .and_then(|_| socket.set_nonblocking(true))
        .and_then(|_| socket.bind(&bind_addr.into()))
        .map_err(|e| TransportError::BindFailed(format!("{bind_addr}: {e}")))?;

    UdpSocket::from_std(socket.into()).map_err(|e| TransportError::BindFailed(e.to_string()))
}

pub struct UdpTransport;

impl UdpTransport {
    /// Socket connected to `peer`, bound to an ephemeral local port
    pub async fn connect(peer: SocketAddr, buffer_size: usize) -> Result<Transport, TransportError> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = create_socket(bind_addr, buffer_size)?;
        socket
            .connect(peer)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{peer}: {e}")))?;

        tracing::debug!("UDP transport {} -> {}", bind_addr, peer);
        Ok(Self::from_socket(socket, Some(peer)))
    }

    /// Socket listening on `bind_addr` for frames from any sender
    pub fn bind(bind_addr: SocketAddr, buffer_size: usize) -> Result<Transport, TransportError> {
        let socket = create_socket(bind_addr, buffer_size)?;
        Ok(Self::from_socket(socket, None))
    }

    fn from_socket(socket: UdpSocket, peer: Option<SocketAddr>) -> Transport {
        let socket = Arc::new(socket);
        Transport::new(
            "udp",
            UdpSink {
                socket: socket.clone(),
                peer,
            },
            UdpSource {
                socket,
                buf: BytesMut::zeroed(MAX_DATAGRAM_SIZE),
            },
        )
    }
}

pub struct UdpSink {
    socket: Arc<UdpSocket>,
    peer: Option<SocketAddr>,
}

pub struct UdpSource {
    socket: Arc<UdpSocket>,
    buf: BytesMut,
}

#[async_trait]
impl FrameSink for UdpSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        if self.peer.is_none() {
            return Err(TransportError::SendFailed("socket has no peer".to_string()));
        }

        let sent = self
            .socket
            .send(&frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if sent != frame.len() {
            return Err(TransportError::SendFailed(format!(
                "short datagram: {sent} of {} bytes",
                frame.len()
            )));
        }
        Ok(())
    }

    async fn close(&mut self) {
        // Nothing to tell the peer; the socket closes when both halves drop
    }
}

#[async_trait]
impl FrameSource for UdpSource {
    async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        let (len, _from) = self
            .socket
            .recv_from(&mut self.buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        Ok(Some(Bytes::copy_from_slice(&self.buf[..len])))
    }
}
