//! Handshake HTTP handlers

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audio::{list_devices, AudioDeviceInfo};
use crate::config::TransportKind;
use crate::handshake::server::AppState;
use crate::network::{ws, UdpTransport};
use crate::peer::PeerIdentity;
use crate::session::SessionReport;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Server status for dashboards and the reporting loop
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub listening: bool,
    pub has_active_peer: bool,
    pub sessions: Vec<SessionReport>,
}

/// Start streaming to the requester, replacing any session it already has
pub async fn connect(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let peer = PeerIdentity::of_requester(addr);

    match state.network.transport {
        TransportKind::Websocket => {
            let Some(upgrade) = upgrade else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::<()>::error("expected a websocket upgrade")),
                )
                    .into_response();
            };

            info!(peer = %peer, "Handshake over websocket");
            upgrade.on_upgrade(move |socket| async move {
                let transport = ws::server_transport(socket);
                // The socket is already closed if this fails
                if let Err(e) = state.registry.accept(peer, transport).await {
                    warn!(peer = %peer, "Could not start session: {}", e);
                }
            })
        }
        TransportKind::Udp => {
            let target = peer.socket_addr(state.network.udp_port);
            info!(peer = %peer, target = %target, "Handshake over udp");

            let transport = match UdpTransport::connect(target, state.network.socket_buffer_size).await {
                Ok(transport) => transport,
                Err(e) => return internal_error(e),
            };
            match state.registry.accept(peer, transport).await {
                Ok(session) => (StatusCode::OK, Json(ApiResponse::ok(session.report()))).into_response(),
                Err(e) => internal_error(e),
            }
        }
    }
}

/// Stop streaming to the requester
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    let peer = PeerIdentity::of_requester(addr);

    if state.registry.release(&peer).await {
        (StatusCode::OK, Json(ApiResponse::ok(())))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("no session for {peer}"))),
        )
    }
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ServerStatus>> {
    Json(ApiResponse::ok(ServerStatus {
        listening: state.listening.load(Ordering::Relaxed),
        has_active_peer: state.registry.has_active_peer(),
        sessions: state.registry.reports(),
    }))
}

/// Get available audio devices
pub async fn devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    let devices = tokio::task::spawn_blocking(list_devices).await.unwrap_or_default();
    Json(ApiResponse::ok(devices))
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    warn!("Handshake failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(e.to_string())),
    )
        .into_response()
}
