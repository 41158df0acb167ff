//! Peer identity used to key sessions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::Error;

/// Network address of a remote listener.
///
/// Handshakes are keyed by host only, since the source port of an HTTP
/// request changes between connections from the same machine.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub host: IpAddr,
    pub port: Option<u16>,
}

impl PeerIdentity {
    pub fn new(host: IpAddr) -> Self {
        Self { host, port: None }
    }

    pub fn with_port(host: IpAddr, port: u16) -> Self {
        Self {
            host,
            port: Some(port),
        }
    }

    /// Identity of the machine behind a request address (port dropped)
    pub fn of_requester(addr: SocketAddr) -> Self {
        Self::new(addr.ip())
    }

    /// Socket address of this peer, falling back to `default_port`
    pub fn socket_addr(&self, default_port: u16) -> SocketAddr {
        SocketAddr::new(self.host, self.port.unwrap_or(default_port))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}", SocketAddr::new(self.host, port)),
            None => write!(f, "{}", self.host),
        }
    }
}

impl FromStr for PeerIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::with_port(addr.ip(), addr.port()));
        }
        s.parse::<IpAddr>()
            .map(Self::new)
            .map_err(|e| Error::Config(format!("invalid peer address {s:?}: {e}")))
    }
}

impl From<IpAddr> for PeerIdentity {
    fn from(host: IpAddr) -> Self {
        Self::new(host)
    }
}
