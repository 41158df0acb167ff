//! In-process transport over tokio channels
//!
//! Behaves like a message transport: frames arrive whole and in order, and
//! dropping or closing one end shows up as a remote close on the other.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::network::{FrameSink, FrameSource, Transport};

pub struct MemorySink {
    tx: Option<mpsc::Sender<Bytes>>,
}

pub struct MemorySource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("peer dropped".to_string()))
    }

    async fn close(&mut self) {
        self.tx.take();
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Two connected transports, each buffering up to `capacity` frames
pub fn pair(capacity: usize) -> (Transport, Transport) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);

    let a = Transport::new("memory", MemorySink { tx: Some(a_tx) }, MemorySource { rx: a_rx });
    let b = Transport::new("memory", MemorySink { tx: Some(b_tx) }, MemorySource { rx: b_rx });
    (a, b)
}
