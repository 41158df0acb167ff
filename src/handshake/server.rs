//! Handshake HTTP server

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::NetworkConfig;
use crate::error::{Result, TransportError};
use crate::handshake::handlers;
use crate::session::SessionRegistry;

/// Shared state for handlers
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub network: NetworkConfig,
    pub listening: AtomicBool,
}

pub struct HandshakeServer {
    state: Arc<AppState>,
}

impl HandshakeServer {
    pub fn new(registry: Arc<SessionRegistry>, network: NetworkConfig) -> Self {
        Self {
            state: Arc::new(AppState {
                registry,
                network,
                listening: AtomicBool::new(false),
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/connect", get(handlers::connect))
            .route("/disconnect", get(handlers::disconnect))
            .route("/status", get(handlers::status))
            .route("/devices", get(handlers::devices))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.state.network.bind_address, self.state.network.port)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Bind the configured handshake address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.bind_addr();
        TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")).into())
    }

    /// Serve handshakes until `shutdown` fires, then stop every session
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let app = self.router();
        let state = self.state;

        info!(
            "Handshake server listening on http://{} ({:?} transport)",
            listener.local_addr()?,
            state.network.transport
        );
        state.listening.store(true, Ordering::Relaxed);

        let registry = state.registry.clone();
        let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Shutting down handshake server");
                // Upgraded sockets belong to sessions, so end those first
                registry.shutdown().await;
            })
            .await;

        state.listening.store(false, Ordering::Relaxed);
        state.registry.shutdown().await;
        result.map_err(Into::into)
    }
}
