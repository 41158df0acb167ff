//! Listening side: ask a server for its feed and play it locally
//!
//! Over websocket the handshake connection carries the frames. Over UDP the
//! client binds its receive port first, then asks for the feed with a plain
//! `GET /connect` and ends it with `GET /disconnect`.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::{SharedBackend, StreamParams};
use crate::config::{AppConfig, NetworkConfig, SessionConfig, TransportKind};
use crate::error::{Result, TransportError};
use crate::network::{endpoint_url, ws, Transport, UdpTransport};
use crate::peer::PeerIdentity;
use crate::session::{Direction, SessionReport, StopReason, StreamingSession};

/// Longest wait for an answer to a handshake request
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection attempt, registered before dialling so `disconnect()`
/// can reach it at any point
struct Connection {
    attempt: u64,
    address: String,
    transport: TransportKind,
    cancel: CancellationToken,
    /// Set once the transport is up
    session: Option<Arc<StreamingSession>>,
}

pub struct Client {
    backend: SharedBackend,
    params: StreamParams,
    session_config: SessionConfig,
    network: NetworkConfig,
    http: reqwest::Client,
    current: Mutex<Option<Connection>>,
    attempts: AtomicU64,
    /// Bytes from sessions that already ended
    finished_bytes: AtomicU64,
}

impl Client {
    pub fn new(config: &AppConfig, backend: SharedBackend) -> Self {
        Self {
            backend,
            params: StreamParams::new(&config.audio, &config.session),
            session_config: config.session.clone(),
            network: config.network.clone(),
            http: reqwest::Client::new(),
            current: Mutex::new(None),
            attempts: AtomicU64::new(0),
            finished_bytes: AtomicU64::new(0),
        }
    }

    /// Connect to `address` and play its feed until the session ends.
    ///
    /// `address` is a host or `host:port`; the configured handshake port is
    /// used when none is given. Any current connection is dropped first.
    /// A `disconnect()` while dialling ends the attempt with `Cancelled`.
    pub async fn connect_to(&self, address: &str) -> Result<StopReason> {
        self.disconnect().await;
        info!("Asking {} to send us audio", address);

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *self.current.lock() = Some(Connection {
            attempt,
            address: address.to_string(),
            transport: self.network.transport,
            cancel: cancel.clone(),
            session: None,
        });

        let dialled = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            dialled = self.dial(address) => Some(dialled),
        };
        let (peer, transport) = match dialled {
            None => {
                info!("Connection attempt to {} cancelled", address);
                return Ok(StopReason::Cancelled);
            }
            Some(Err(e)) => {
                self.take_attempt(attempt);
                return Err(e);
            }
            Some(Ok(dialled)) => dialled,
        };

        let session = StreamingSession::new(
            peer,
            Direction::Playback,
            transport,
            self.backend.clone(),
            self.params.clone(),
            self.session_config.clone(),
        );
        let attached = match self.current.lock().as_mut() {
            Some(connection) if connection.attempt == attempt => {
                connection.session = Some(session.clone());
                true
            }
            _ => false,
        };
        if !attached {
            info!("Connection attempt to {} cancelled", address);
            session.stop();
            return Ok(StopReason::Cancelled);
        }

        let outcome = match session.start().await {
            Ok(()) => {
                info!("Connected to {}", address);
                session.stopped().await;
                Ok(session.stop_reason().unwrap_or(StopReason::Cancelled))
            }
            Err(e) => Err(e),
        };

        self.finished_bytes
            .fetch_add(session.bytes_transferred(), Ordering::Relaxed);
        // Still ours, so the server was not told yet
        if let Some(connection) = self.take_attempt(attempt) {
            self.release(&connection).await;
        }

        if let Ok(reason) = &outcome {
            info!(reason = ?reason, "Disconnected from {}", address);
        }
        outcome
    }

    /// Stop playing and close the connection, if any
    pub async fn disconnect(&self) {
        let taken = self.current.lock().take();
        let Some(connection) = taken else {
            return;
        };

        info!("Disconnecting from {}", connection.address);
        connection.cancel.cancel();
        if let Some(session) = &connection.session {
            session.stop();
        }
        self.release(&connection).await;
    }

    /// Bytes received over every connection so far
    pub fn bytes_received(&self) -> u64 {
        let live = self
            .current
            .lock()
            .as_ref()
            .and_then(|c| c.session.as_ref())
            .map_or(0, |s| s.bytes_transferred());
        self.finished_bytes.load(Ordering::Relaxed) + live
    }

    /// Seconds the current connection has been up
    pub fn connected_secs(&self) -> f64 {
        self.current
            .lock()
            .as_ref()
            .and_then(|c| c.session.as_ref())
            .map_or(0.0, |s| s.connected_secs())
    }

    /// Snapshot of the current session, once the transport is up
    pub fn report(&self) -> Option<SessionReport> {
        self.current
            .lock()
            .as_ref()
            .and_then(|c| c.session.as_ref())
            .map(|s| s.report())
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .and_then(|c| c.session.as_ref())
            .is_some_and(|s| s.is_streaming())
    }

    pub fn is_connected_to(&self, address: &str) -> bool {
        self.current.lock().as_ref().is_some_and(|c| {
            c.address == address && c.session.as_ref().is_some_and(|s| s.is_streaming())
        })
    }

    /// Open the frame transport to `address`
    async fn dial(&self, address: &str) -> Result<(PeerIdentity, Transport)> {
        let peer = resolve_peer(address, self.network.port).await?;

        let transport = match self.network.transport {
            TransportKind::Websocket => ws::connect(address, self.network.port).await?,
            TransportKind::Udp => {
                // Bound before asking, so the first datagrams have somewhere to land
                let bind_addr = SocketAddr::new(self.network.bind_address, self.network.udp_port);
                let transport = UdpTransport::bind(bind_addr, self.network.socket_buffer_size)?;
                self.request(address, "/connect").await?;
                debug!("Receiving UDP frames on {}", bind_addr);
                transport
            }
        };
        Ok((peer, transport))
    }

    /// Remove the connection if it still belongs to `attempt`
    fn take_attempt(&self, attempt: u64) -> Option<Connection> {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.attempt == attempt) {
            current.take()
        } else {
            None
        }
    }

    /// Tell a UDP server to stop sending; websocket servers see the socket close
    async fn release(&self, connection: &Connection) {
        if connection.transport != TransportKind::Udp {
            return;
        }
        if let Err(e) = self.request(&connection.address, "/disconnect").await {
            debug!("Disconnect request failed: {}", e);
        }
    }

    async fn request(&self, address: &str, path: &str) -> std::result::Result<(), TransportError> {
        let url = endpoint_url("http", address, self.network.port, path);
        let response = self
            .http
            .get(url.as_str())
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "bad status {} from {}",
                response.status(),
                url
            )));
        }
        Ok(())
    }
}

async fn resolve_peer(address: &str, default_port: u16) -> Result<PeerIdentity> {
    if let Ok(peer) = address.parse::<PeerIdentity>() {
        return Ok(peer);
    }

    let target = match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{default_port}"),
    };
    let resolved: Option<SocketAddr> = tokio::net::lookup_host(target.as_str())
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("{address}: {e}")))?
        .next();

    resolved
        .map(|addr| PeerIdentity::with_port(addr.ip(), addr.port()))
        .ok_or_else(|| TransportError::ConnectionFailed(format!("{address}: no addresses")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockBackend;
    use crate::error::Error;
    use crate::handshake::HandshakeServer;
    use crate::session::SessionRegistry;

    const FRAME: usize = 8;

    fn config(port: u16, transport: TransportKind) -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.frame_length = FRAME;
        config.audio.sample_rate = 8000;
        config.network.bind_address = [127, 0, 0, 1].into();
        config.network.port = port;
        config.network.transport = transport;
        config
    }

    async fn wait_for(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Serve `server_audio` as a capture feed on an ephemeral handshake port
    async fn spawn_server(
        server_audio: &MockBackend,
        transport: TransportKind,
        udp_port: u16,
    ) -> (AppConfig, Arc<SessionRegistry>, CancellationToken) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config(listener.local_addr().unwrap().port(), transport);
        config.network.udp_port = udp_port;

        let registry = Arc::new(SessionRegistry::new(
            Direction::Capture,
            Arc::new(server_audio.clone()),
            StreamParams::new(&config.audio, &config.session),
            config.session.clone(),
        ));
        let server = HandshakeServer::new(registry.clone(), config.network.clone());
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(listener, shutdown.clone()));
        (config, registry, shutdown)
    }

    #[tokio::test]
    async fn test_resolve_peer() {
        let peer = resolve_peer("10.1.2.3", 3456).await.unwrap();
        assert_eq!(peer.to_string(), "10.1.2.3");

        let peer = resolve_peer("localhost:4000", 3456).await.unwrap();
        assert!(peer.host.is_loopback());
    }

    #[tokio::test]
    async fn test_plays_server_feed() {
        let server_audio = MockBackend::new();
        let client_audio = MockBackend::new();
        let (config, _registry, shutdown) =
            spawn_server(&server_audio, TransportKind::Websocket, 0).await;

        let client = Arc::new(Client::new(&config, Arc::new(client_audio.clone())));
        let running = {
            let client = client.clone();
            tokio::spawn(async move { client.connect_to("127.0.0.1").await })
        };

        wait_for("client connection", || client.is_connected()).await;
        wait_for("server capture", || server_audio.device().is_capturing()).await;
        assert!(client.is_connected_to("127.0.0.1"));
        assert!(!client.is_connected_to("10.0.0.1"));

        let samples: Vec<f32> = (0..FRAME).map(|i| i as f32 * 0.1 + 0.05).collect();
        server_audio.device().push_frame(&samples);
        wait_for("frame received", || client.bytes_received() == (FRAME * 4) as u64).await;

        let mut played = Vec::new();
        for _ in 0..100 {
            played = client_audio.device().pull(FRAME).unwrap();
            if played != vec![0.0; FRAME] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(played, samples);

        client.disconnect().await;
        let reason = running.await.unwrap().unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert!(!client.is_connected());
        assert_eq!(client.bytes_received(), (FRAME * 4) as u64);
        assert!(!client_audio.device().is_playing());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_plays_server_feed_over_udp() {
        let server_audio = MockBackend::new();
        let client_audio = MockBackend::new();

        // Find a free port for the client to receive on
        let udp_port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (config, registry, shutdown) = spawn_server(&server_audio, TransportKind::Udp, udp_port).await;

        let client = Arc::new(Client::new(&config, Arc::new(client_audio.clone())));
        let running = {
            let client = client.clone();
            tokio::spawn(async move { client.connect_to("127.0.0.1").await })
        };

        wait_for("client connection", || client.is_connected()).await;
        wait_for("server session", || registry.has_active_peer()).await;
        wait_for("server capture", || server_audio.device().is_capturing()).await;

        let samples: Vec<f32> = (0..FRAME).map(|i| 0.5 - i as f32 * 0.05).collect();
        server_audio.device().push_frame(&samples);
        wait_for("datagram received", || client.bytes_received() == (FRAME * 4) as u64).await;
        assert_eq!(client_audio.device().pull(FRAME).unwrap(), samples);
        let report = client.report().unwrap();
        assert_eq!(report.direction, Direction::Playback);
        assert_eq!(report.frames_transferred, 1);

        // The server is told to stop sending before disconnect returns
        client.disconnect().await;
        assert!(registry.is_empty());
        assert!(!server_audio.device().is_capturing());

        let reason = running.await.unwrap().unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert!(!client_audio.device().is_playing());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_udp_connect_rejected() {
        // Websocket server: a plain GET /connect is refused with 400
        let (mut config, _registry, shutdown) =
            spawn_server(&MockBackend::new(), TransportKind::Websocket, 0).await;
        config.network.transport = TransportKind::Udp;
        config.network.udp_port = 0;

        let client = Client::new(&config, Arc::new(MockBackend::new()));
        let result = client.connect_to("127.0.0.1").await;
        assert!(matches!(result, Err(Error::Transport(TransportError::ConnectionFailed(_)))));
        assert!(!client.is_connected());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_while_dialling() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client_audio = MockBackend::new();

        let client = Arc::new(Client::new(
            &config(port, TransportKind::Websocket),
            Arc::new(client_audio.clone()),
        ));
        let running = {
            let client = client.clone();
            tokio::spawn(async move { client.connect_to("127.0.0.1").await })
        };

        // Accept the TCP connection but never answer the upgrade
        let (_stream, _) = listener.accept().await.unwrap();
        client.disconnect().await;

        let reason = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert!(!client.is_connected());
        assert_eq!(client_audio.device().opened_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = Client::new(&config(port, TransportKind::Websocket), Arc::new(MockBackend::new()));
        let result = client.connect_to("127.0.0.1").await;
        assert!(matches!(result, Err(Error::Transport(TransportError::ConnectionFailed(_)))));
        assert!(!client.is_connected());
    }
}
