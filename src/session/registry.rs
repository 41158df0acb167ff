//! One live session per peer
//!
//! Lookups go straight to the map. Inserts, evictions and removals are
//! serialized by the admission lock so a handshake never sees a half
//! replaced entry. Running sessions never touch the lock.

use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{SharedBackend, StreamParams};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::network::Transport;
use crate::peer::PeerIdentity;
use crate::session::{Direction, SessionReport, StreamingSession};

type SessionMap = DashMap<PeerIdentity, Arc<StreamingSession>>;

pub struct SessionRegistry {
    direction: Direction,
    backend: SharedBackend,
    params: StreamParams,
    config: SessionConfig,
    sessions: Arc<SessionMap>,
    admission: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(
        direction: Direction,
        backend: SharedBackend,
        params: StreamParams,
        config: SessionConfig,
    ) -> Self {
        Self {
            direction,
            backend,
            params,
            config,
            sessions: Arc::new(DashMap::new()),
            admission: Mutex::new(()),
        }
    }

    /// Replace whatever session `peer` has with a new one streaming over
    /// `transport`.
    ///
    /// The previous session is stopped and given `stop_timeout` to release
    /// its device before the new one opens it. On success the new session is
    /// registered and already streaming; if its device cannot be opened
    /// nothing is registered and the error is returned.
    pub async fn accept(&self, peer: PeerIdentity, transport: Transport) -> Result<Arc<StreamingSession>> {
        let _admission = self.admission.lock().await;

        if let Some((_, old)) = self.sessions.remove(&peer) {
            info!(peer = %peer, session = %old.id(), "Replacing existing session");
            old.stop();
            if !old.wait_stopped(self.config.stop_timeout()).await {
                warn!(peer = %peer, session = %old.id(), "Previous session slow to stop");
            }
        }

        let session = StreamingSession::new(
            peer,
            self.direction,
            transport,
            self.backend.clone(),
            self.params.clone(),
            self.config.clone(),
        );
        session.start().await?;

        self.sessions.insert(peer, session.clone());
        self.spawn_reaper(session.clone());
        Ok(session)
    }

    /// Stop and remove the session for `peer`. False if there was none.
    pub async fn release(&self, peer: &PeerIdentity) -> bool {
        let _admission = self.admission.lock().await;

        let Some((_, session)) = self.sessions.remove(peer) else {
            debug!(peer = %peer, "No session to release");
            return false;
        };
        info!(peer = %peer, session = %session.id(), "Releasing session");
        session.stop();
        if !session.wait_stopped(self.config.stop_timeout()).await {
            warn!(peer = %peer, session = %session.id(), "Session slow to stop");
        }
        true
    }

    /// Stop every session and empty the registry
    pub async fn shutdown(&self) {
        let _admission = self.admission.lock().await;

        let peers: Vec<PeerIdentity> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let sessions: Vec<_> = peers
            .iter()
            .filter_map(|peer| self.sessions.remove(peer).map(|(_, session)| session))
            .collect();
        if sessions.is_empty() {
            return;
        }

        info!("Stopping {} session(s)", sessions.len());
        for session in &sessions {
            session.stop();
        }

        let timeout = self.config.stop_timeout();
        let stopped = join_all(sessions.iter().map(|s| s.wait_stopped(timeout))).await;
        let lagging = stopped.iter().filter(|done| !**done).count();
        if lagging > 0 {
            warn!("{} session(s) did not stop within {:?}", lagging, timeout);
        }
    }

    pub fn lookup(&self, peer: &PeerIdentity) -> Option<Arc<StreamingSession>> {
        self.sessions.get(peer).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn has_active_peer(&self) -> bool {
        self.sessions.iter().any(|entry| entry.value().is_streaming())
    }

    pub fn reports(&self) -> Vec<SessionReport> {
        let mut reports: Vec<_> = self.sessions.iter().map(|entry| entry.value().report()).collect();
        reports.sort_by(|a, b| a.peer.cmp(&b.peer));
        reports
    }

    /// Drop the entry once the session stops on its own. A newer session
    /// for the same peer is left alone.
    fn spawn_reaper(&self, session: Arc<StreamingSession>) {
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            session.stopped().await;
            let id = session.id();
            if sessions.remove_if(&session.peer(), |_, current| current.id() == id).is_some() {
                debug!(peer = %session.peer(), session = %id, "Removed stopped session");
            }
        });
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("direction", &self.direction)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
