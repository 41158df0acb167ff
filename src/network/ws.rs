//! WebSocket transport
//!
//! One binary message per frame. Text, ping and pong messages are skipped;
//! a close frame or the end of the stream is a remote close.

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::network::{endpoint_url, FrameSink, FrameSource, Transport};

/// Server end of an upgraded handshake connection
pub fn server_transport(socket: WebSocket) -> Transport {
    let (sink, source) = socket.split();
    Transport::new("websocket", AxumSink { inner: sink }, AxumSource { inner: source })
}

pub struct AxumSink {
    inner: SplitSink<WebSocket, AxumMessage>,
}

pub struct AxumSource {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(AxumMessage::Binary(frame.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.send(AxumMessage::Close(None)).await;
        let _ = self.inner.close().await;
    }
}

#[async_trait]
impl FrameSource for AxumSource {
    async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.inner.next().await {
                None | Some(Ok(AxumMessage::Close(_))) => return Ok(None),
                Some(Ok(AxumMessage::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
    }
}

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct ClientSink {
    inner: SplitSink<ClientStream, WsMessage>,
}

pub struct ClientSource {
    inner: SplitStream<ClientStream>,
}

#[async_trait]
impl FrameSink for ClientSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::Binary(frame.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.send(WsMessage::Close(None)).await;
        let _ = self.inner.close().await;
    }
}

#[async_trait]
impl FrameSource for ClientSource {
    async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.inner.next().await {
                None | Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(WsMessage::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
    }
}

/// Dial a server's `/connect` endpoint
pub async fn connect(address: &str, default_port: u16) -> Result<Transport, TransportError> {
    let url = endpoint_url("ws", address, default_port, "/connect");
    tracing::debug!("Dialing {}", url);

    let (stream, response) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    if response.status().as_u16() != 101 {
        return Err(TransportError::ConnectionFailed(format!(
            "bad status {} from {}",
            response.status(),
            url
        )));
    }

    let (sink, source) = stream.split();
    Ok(Transport::new(
        "websocket",
        ClientSink { inner: sink },
        ClientSource { inner: source },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::WebSocketUpgrade;
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;

    async fn echo(ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(|socket| async move {
            let mut transport = server_transport(socket);
            while let Ok(Some(frame)) = transport.recv_frame().await {
                if transport.send_frame(frame).await.is_err() {
                    break;
                }
            }
            transport.close().await;
        })
    }

    #[tokio::test]
    async fn test_client_server_echo() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/connect", get(echo));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let mut client = connect(&addr.to_string(), 0).await.unwrap();
        client.send_frame(Bytes::from_static(&[1, 2, 3, 4])).await.unwrap();

        let echoed = client.recv_frame().await.unwrap().unwrap();
        assert_eq!(&echoed[..], &[1, 2, 3, 4]);

        client.close().await;
    }
}
