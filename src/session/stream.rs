//! Per-peer streaming session
//!
//! ```text
//!   Created ──start()──► Streaming ──stop() / breaker / remote close──► Stopped
//!      │                                                                   ▲
//!      └──────────────stop() or device open failure────────────────────────┘
//! ```
//!
//! A session owns one transport and, once started, one audio device. All
//! streaming happens on a single spawned task which races every wait against
//! the session's cancellation token, so `stop()` takes effect without
//! waiting for more audio or network traffic.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};
use uuid::Uuid;

use crate::audio::{
    AudioBackend, CaptureSink, DeviceHandle, FrameQueue, PlaybackSource, QueueStats, SharedBackend,
    StreamParams,
};
use crate::codec::{is_silent, FrameDecoder, FrameEncoder};
use crate::config::SessionConfig;
use crate::error::{AudioError, Error, SessionError, TransportError};
use crate::network::{FrameSink, FrameSource, Transport};
use crate::peer::PeerIdentity;
use crate::session::FailureTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Transport established, device not yet opened
    Created,
    Streaming,
    /// Terminal
    Stopped,
}

/// Which way audio flows through the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Capture device to network
    Capture,
    /// Network to playback device
    Playback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` was called
    Cancelled,
    /// The failure tracker gave up on the peer
    RateExceeded,
    RemoteClosed,
    /// The capture device stopped producing frames for good
    DeviceClosed,
    /// The device could not be opened
    DeviceUnavailable,
}

/// Read-only snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub peer: String,
    pub direction: Direction,
    pub state: SessionState,
    pub bytes_transferred: u64,
    pub frames_transferred: u64,
    pub silent_frames_skipped: u64,
    /// Frames lost because the device or the network fell behind
    pub frames_dropped: u64,
    /// Output callbacks that found nothing to play
    pub underruns: u64,
    pub recent_failures: usize,
    pub connected_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// What the session holds between creation and `start()`
struct Pending {
    transport: Transport,
    backend: SharedBackend,
}

/// Device-side end of the frame queue, per direction
enum Feed {
    Capture(mpsc::Receiver<Vec<f32>>),
    Playback(Arc<FrameQueue>),
}

pub struct StreamingSession {
    id: Uuid,
    peer: PeerIdentity,
    direction: Direction,
    params: StreamParams,
    config: SessionConfig,

    connected_at: Mutex<Option<(Instant, DateTime<Utc>)>>,
    stopped_at: Mutex<Option<Instant>>,
    bytes_transferred: AtomicU64,
    frames_transferred: AtomicU64,
    silent_frames: AtomicU64,
    queue_stats: Arc<QueueStats>,

    state: watch::Sender<SessionState>,
    stop_reason: Mutex<Option<StopReason>>,
    cancel: CancellationToken,
    tracker: FailureTracker,
    pending: Mutex<Option<Pending>>,
}

impl StreamingSession {
    pub fn new(
        peer: PeerIdentity,
        direction: Direction,
        transport: Transport,
        backend: SharedBackend,
        params: StreamParams,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Created);
        let tracker = FailureTracker::new(config.failure_capacity, config.failure_window());

        Arc::new(Self {
            id: Uuid::new_v4(),
            peer,
            direction,
            params,
            config,
            connected_at: Mutex::new(None),
            stopped_at: Mutex::new(None),
            bytes_transferred: AtomicU64::new(0),
            frames_transferred: AtomicU64::new(0),
            silent_frames: AtomicU64::new(0),
            queue_stats: Arc::default(),
            state,
            stop_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
            tracker,
            pending: Mutex::new(Some(Pending { transport, backend })),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> PeerIdentity {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Encoded bytes written (capture) or received (playback)
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub fn frames_transferred(&self) -> u64 {
        self.frames_transferred.load(Ordering::Relaxed)
    }

    pub fn silent_frames_skipped(&self) -> u64 {
        self.silent_frames.load(Ordering::Relaxed)
    }

    /// Frames dropped between the device and the session loop
    pub fn frames_dropped(&self) -> u64 {
        self.queue_stats.dropped()
    }

    pub fn underruns(&self) -> u64 {
        self.queue_stats.underruns()
    }

    pub fn recent_failures(&self) -> usize {
        self.tracker.recent()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.lock()
    }

    /// Wall-clock time the session started streaming
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at.lock().map(|(_, wall)| wall)
    }

    /// Time spent connected; frozen once the session stops
    pub fn elapsed(&self) -> Duration {
        let Some((started, _)) = *self.connected_at.lock() else {
            return Duration::ZERO;
        };
        let end = self.stopped_at.lock().unwrap_or_else(Instant::now);
        end.saturating_duration_since(started)
    }

    pub fn connected_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            id: self.id,
            peer: self.peer.to_string(),
            direction: self.direction,
            state: self.state(),
            bytes_transferred: self.bytes_transferred(),
            frames_transferred: self.frames_transferred(),
            silent_frames_skipped: self.silent_frames_skipped(),
            frames_dropped: self.frames_dropped(),
            underruns: self.underruns(),
            recent_failures: self.recent_failures(),
            connected_at: self.connected_at(),
            elapsed_secs: self.connected_secs(),
            stop_reason: self.stop_reason(),
        }
    }

    /// Ask the session to stop. Safe to call any number of times, from anywhere.
    ///
    /// A session that was never started releases its transport right away;
    /// a streaming one stops on its own task.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(peer = %self.peer, session = %self.id, "Stop requested");
        }
        self.cancel.cancel();

        if let Some(pending) = self.pending.lock().take() {
            drop(pending);
            self.set_stop_reason(StopReason::Cancelled);
            self.mark_stopped();
        }
    }

    /// Resolves once the session is `Stopped`
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Stopped).await;
    }

    /// Wait up to `timeout` for the session to stop; false on timeout
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.stopped()).await.is_ok()
    }

    /// Open the device and spawn the streaming task.
    ///
    /// Returns once the device is running; streaming continues in the
    /// background. If the device cannot be opened the transport is closed,
    /// the session ends `Stopped` and the error is returned.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        let pending = self.pending.lock().take();
        let Some(Pending { transport, backend }) = pending else {
            return Err(match self.state() {
                SessionState::Stopped => SessionError::Stopped(self.id),
                _ => SessionError::AlreadyStarted(self.id),
            }
            .into());
        };

        let kind = transport.kind();
        let (mut sink, source) = transport.into_parts();

        let opened = match self.direction {
            Direction::Capture => {
                let (tx, rx) = mpsc::channel(self.config.queue_frames);
                let sink = CaptureSink::new(tx, self.params.frame_length, self.queue_stats.clone());
                self.open_device(backend, move |backend, params| backend.open_capture(params, sink))
                    .await
                    .map(|device| (device, Feed::Capture(rx)))
            }
            Direction::Playback => {
                let queue = Arc::new(FrameQueue::new(self.config.queue_frames, self.queue_stats.clone()));
                let source = PlaybackSource::new(queue.clone());
                self.open_device(backend, move |backend, params| backend.open_playback(params, source))
                    .await
                    .map(|device| (device, Feed::Playback(queue)))
            }
        };

        let (device, feed) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(peer = %self.peer, session = %self.id, "Device unavailable: {}", e);
                self.close_sink(sink.as_mut()).await;
                self.set_stop_reason(StopReason::DeviceUnavailable);
                self.mark_stopped();
                return Err(e.into());
            }
        };

        *self.connected_at.lock() = Some((Instant::now(), Utc::now()));
        self.state.send_replace(SessionState::Streaming);
        info!(
            peer = %self.peer,
            session = %self.id,
            direction = ?self.direction,
            transport = kind,
            device = device.label(),
            "Streaming started"
        );

        let span = tracing::info_span!("session", peer = %self.peer, id = %self.id);
        let session = Arc::clone(self);
        tokio::spawn(session.run(device, sink, source, feed).instrument(span));

        Ok(())
    }

    /// Device opens can block for a while, so they run off the async workers
    async fn open_device<F>(&self, backend: SharedBackend, open: F) -> Result<DeviceHandle, AudioError>
    where
        F: FnOnce(&dyn AudioBackend, &StreamParams) -> Result<DeviceHandle, AudioError> + Send + 'static,
    {
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || open(backend.as_ref(), &params))
            .await
            .map_err(|e| AudioError::DeviceOpen(format!("device open task failed: {e}")))?
    }

    async fn run(
        self: Arc<Self>,
        device: DeviceHandle,
        mut sink: Box<dyn FrameSink>,
        mut source: Box<dyn FrameSource>,
        feed: Feed,
    ) {
        // Reaches Stopped on every exit path, including a panicking loop
        let _stopped = StopGuard(Arc::clone(&self));

        let reason = match feed {
            Feed::Capture(frames) => self.capture_loop(frames, sink.as_mut(), source.as_mut()).await,
            Feed::Playback(queue) => self.playback_loop(&queue, source.as_mut()).await,
        };
        self.set_stop_reason(reason);

        // Stream teardown joins the device thread
        if tokio::task::spawn_blocking(move || drop(device)).await.is_err() {
            warn!("Device release panicked");
        }
        self.close_sink(sink.as_mut()).await;
        drop(source);

        info!(
            reason = ?reason,
            bytes = self.bytes_transferred(),
            frames = self.frames_transferred(),
            dropped = self.frames_dropped(),
            elapsed_secs = self.connected_secs(),
            "Streaming stopped"
        );
    }

    async fn capture_loop(
        &self,
        mut frames: mpsc::Receiver<Vec<f32>>,
        sink: &mut dyn FrameSink,
        source: &mut dyn FrameSource,
    ) -> StopReason {
        let encoder = FrameEncoder::new(self.params.frame_length);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return StopReason::Cancelled,

                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return StopReason::DeviceClosed;
                    };
                    if is_silent(&frame) {
                        self.silent_frames.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    let bytes = match encoder.encode(&frame) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("Failed to encode frame: {}", e);
                            if !self.tracker.record_failure() {
                                return self.rate_exceeded();
                            }
                            continue;
                        }
                    };

                    let len = bytes.len() as u64;
                    let sent = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return StopReason::Cancelled,
                        sent = self.send_bounded(sink, bytes) => sent,
                    };

                    match sent {
                        Ok(()) => {
                            self.bytes_transferred.fetch_add(len, Ordering::Relaxed);
                            self.frames_transferred.fetch_add(1, Ordering::Relaxed);
                            trace!(bytes = len, "Frame sent");
                        }
                        Err(e) => {
                            warn!("Failed to send frame: {}", e);
                            if !self.tracker.record_failure() {
                                return self.rate_exceeded();
                            }
                        }
                    }
                }

                inbound = source.recv_frame() => match inbound {
                    Ok(None) => {
                        info!("Peer closed the connection");
                        return StopReason::RemoteClosed;
                    }
                    Ok(Some(frame)) => trace!(bytes = frame.len(), "Ignoring inbound frame"),
                    Err(e) => {
                        warn!("Transport read failed: {}", e);
                        if !self.tracker.record_failure() {
                            return self.rate_exceeded();
                        }
                    }
                },
            }
        }
    }

    async fn playback_loop(&self, queue: &FrameQueue, source: &mut dyn FrameSource) -> StopReason {
        let decoder = FrameDecoder::new(self.params.frame_length);

        loop {
            let inbound = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StopReason::Cancelled,
                inbound = tokio::time::timeout(self.config.read_timeout(), source.recv_frame()) => inbound,
            };

            match inbound {
                Err(_) => trace!("No frame within read timeout"),
                Ok(Ok(None)) => {
                    info!("Peer closed the connection");
                    return StopReason::RemoteClosed;
                }
                Ok(Ok(Some(bytes))) => {
                    self.bytes_transferred.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    match decoder.decode(&bytes) {
                        Ok(frame) => {
                            self.frames_transferred.fetch_add(1, Ordering::Relaxed);
                            if !queue.push(frame) {
                                debug!("Playback queue full, frame dropped");
                            }
                        }
                        Err(e) => warn!("Dropping frame: {}", e),
                    }
                }
                Ok(Err(e)) => {
                    warn!("Transport read failed: {}", e);
                    if !self.tracker.record_failure() {
                        return self.rate_exceeded();
                    }
                }
            }
        }
    }

    async fn send_bounded(&self, sink: &mut dyn FrameSink, frame: Bytes) -> Result<(), TransportError> {
        tokio::time::timeout(self.config.write_timeout(), sink.send_frame(frame))
            .await
            .unwrap_or(Err(TransportError::Timeout))
    }

    async fn close_sink(&self, sink: &mut dyn FrameSink) {
        if tokio::time::timeout(self.config.close_timeout(), sink.close()).await.is_err() {
            debug!("Transport close timed out");
        }
    }

    fn rate_exceeded(&self) -> StopReason {
        warn!(
            capacity = self.tracker.capacity(),
            window_ms = self.tracker.window().as_millis() as u64,
            "Too many transport errors, peer is gone"
        );
        StopReason::RateExceeded
    }

    fn set_stop_reason(&self, reason: StopReason) {
        self.stop_reason.lock().get_or_insert(reason);
    }

    fn mark_stopped(&self) {
        self.cancel.cancel();
        self.stopped_at.lock().get_or_insert_with(Instant::now);
        self.set_stop_reason(StopReason::Cancelled);
        self.state.send_replace(SessionState::Stopped);
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .finish()
    }
}

struct StopGuard(Arc<StreamingSession>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockBackend;
    use crate::codec::FrameEncoder;
    use crate::network::memory;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const FRAME: usize = 16;

    fn params() -> StreamParams {
        StreamParams {
            sample_rate: 8000,
            channels: 1,
            frame_length: FRAME,
            open_timeout: Duration::from_secs(1),
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            failure_capacity: 5,
            failure_window_ms: 10_000,
            read_timeout_ms: 50,
            write_timeout_ms: 200,
            stop_timeout_ms: 500,
            close_timeout_ms: 100,
            device_open_timeout_ms: 1000,
            queue_frames: 8,
        }
    }

    fn session(direction: Direction, transport: Transport, backend: &MockBackend) -> Arc<StreamingSession> {
        session_with(direction, transport, backend, config())
    }

    fn session_with(
        direction: Direction,
        transport: Transport,
        backend: &MockBackend,
        config: SessionConfig,
    ) -> Arc<StreamingSession> {
        StreamingSession::new(
            "10.0.0.7".parse().unwrap(),
            direction,
            transport,
            Arc::new(backend.clone()),
            params(),
            config,
        )
    }

    async fn eventually(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Sink whose every write fails
    struct BrokenSink {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSink for BrokenSink {
        async fn send_frame(&mut self, _frame: Bytes) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::SendFailed("link down".to_string()))
        }

        async fn close(&mut self) {}
    }

    /// Sink whose writes never complete
    struct StalledSink {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSink for StalledSink {
        async fn send_frame(&mut self, _frame: Bytes) -> Result<(), TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    /// Source whose every read fails
    struct FailingSource {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSource for FailingSource {
        async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::ReceiveFailed("connection reset".to_string()))
        }
    }

    /// Source that never delivers anything
    struct QuietSource;

    #[async_trait]
    impl FrameSource for QuietSource {
        async fn recv_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_capture_sends_non_silent_frames() {
        let backend = MockBackend::new();
        let device = backend.device();
        let (local, mut remote) = memory::pair(16);

        let session = session(Direction::Capture, local, &backend);
        assert_eq!(session.state(), SessionState::Created);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.connected_at().is_some());

        assert!(device.push_frame(&[0.5; FRAME]));
        let frame = remote.recv_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), FRAME * 4);
        assert_eq!(session.bytes_transferred(), (FRAME * 4) as u64);

        // Silence is skipped; the next sound frame proves it was processed
        device.push_frame(&[0.0; FRAME]);
        let tone: Vec<f32> = (0..FRAME).map(|i| i as f32 / 100.0 + 0.01).collect();
        device.push_frame(&tone);

        let frame = remote.recv_frame().await.unwrap().unwrap();
        let decoded = FrameDecoder::new(FRAME).decode(&frame).unwrap();
        assert_eq!(decoded, tone);
        assert_eq!(session.bytes_transferred(), (2 * FRAME * 4) as u64);
        assert_eq!(session.silent_frames_skipped(), 1);
        assert_eq!(session.frames_transferred(), 2);

        session.stop();
        assert!(session.wait_stopped(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_write_failures_trip_breaker_after_capacity() {
        let backend = MockBackend::new();
        let device = backend.device();
        let attempts = Arc::new(AtomicUsize::new(0));
        let transport = Transport::new(
            "broken",
            BrokenSink {
                attempts: attempts.clone(),
            },
            QuietSource,
        );

        let session = session(Direction::Capture, transport, &backend);
        session.start().await.unwrap();

        for _ in 0..5 {
            device.push_frame(&[0.5; FRAME]);
        }
        eventually("five failed writes", || attempts.load(Ordering::SeqCst) == 5).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.recent_failures(), 5);

        device.push_frame(&[0.5; FRAME]);
        assert!(session.wait_stopped(Duration::from_secs(1)).await);
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert_eq!(session.stop_reason(), Some(StopReason::RateExceeded));
        assert_eq!(session.bytes_transferred(), 0);

        // Device released, nothing more is attempted
        assert!(!device.is_capturing());
        assert_eq!(device.closed_count(), 1);
        device.push_frame(&[0.5; FRAME]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_stalled_writes_time_out_and_trip_breaker() {
        let backend = MockBackend::new();
        let device = backend.device();
        let attempts = Arc::new(AtomicUsize::new(0));
        let transport = Transport::new(
            "stalled",
            StalledSink {
                attempts: attempts.clone(),
            },
            QuietSource,
        );
        let config = SessionConfig {
            write_timeout_ms: 20,
            ..config()
        };

        let session = session_with(Direction::Capture, transport, &backend, config);
        session.start().await.unwrap();

        let started = std::time::Instant::now();
        for _ in 0..6 {
            device.push_frame(&[0.5; FRAME]);
        }
        assert!(session.wait_stopped(Duration::from_secs(2)).await);

        // Each write was abandoned after the write timeout
        assert!(started.elapsed() >= Duration::from_millis(6 * 20));
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert_eq!(session.stop_reason(), Some(StopReason::RateExceeded));
        assert_eq!(session.bytes_transferred(), 0);
        assert_eq!(session.frames_transferred(), 0);
        assert!(!device.is_capturing());
    }

    #[tokio::test]
    async fn test_read_failures_trip_breaker_after_capacity() {
        let backend = MockBackend::new();
        let device = backend.device();
        let writes = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let transport = Transport::new(
            "failing",
            BrokenSink {
                attempts: writes.clone(),
            },
            FailingSource {
                attempts: reads.clone(),
            },
        );

        let session = session(Direction::Playback, transport, &backend);
        session.start().await.unwrap();

        assert!(session.wait_stopped(Duration::from_secs(1)).await);
        assert_eq!(reads.load(Ordering::SeqCst), config().failure_capacity + 1);
        assert_eq!(session.stop_reason(), Some(StopReason::RateExceeded));
        assert_eq!(writes.load(Ordering::SeqCst), 0);

        assert!(!device.is_playing());
        assert_eq!(device.opened_count(), 1);
        assert_eq!(device.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_losses_are_reported() {
        let backend = MockBackend::new();
        let device = backend.device();
        let (local, mut remote) = memory::pair(16);

        let session = session(Direction::Playback, local, &backend);
        session.start().await.unwrap();

        // Nothing is pulled, so the playback queue of 8 overflows
        let encoded = FrameEncoder::new(FRAME).encode(&[0.5; FRAME]).unwrap();
        for _ in 0..10 {
            remote.send_frame(encoded.clone()).await.unwrap();
        }
        eventually("ten frames", || session.frames_transferred() == 10).await;
        assert_eq!(session.frames_dropped(), 2);

        for _ in 0..8 {
            assert_eq!(device.pull(FRAME).unwrap(), vec![0.5; FRAME]);
        }
        assert_eq!(session.underruns(), 0);
        assert_eq!(device.pull(FRAME).unwrap(), vec![0.0; FRAME]);

        let report = session.report();
        assert_eq!(report.frames_dropped, 2);
        assert_eq!(report.underruns, 1);

        session.stop();
        assert!(session.wait_stopped(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stop_without_device_activity() {
        let backend = MockBackend::new();
        let (local, _remote) = memory::pair(4);

        let session = session(Direction::Capture, local, &backend);
        session.start().await.unwrap();

        let started = std::time::Instant::now();
        session.stop();
        session.stop();
        assert!(session.wait_stopped(Duration::from_millis(200)).await);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(session.stop_reason(), Some(StopReason::Cancelled));
        assert!(!backend.device().is_capturing());

        let frozen = session.elapsed();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.elapsed(), frozen);
    }

    #[tokio::test]
    async fn test_remote_close_stops_capture() {
        let backend = MockBackend::new();
        let (local, remote) = memory::pair(4);

        let session = session(Direction::Capture, local, &backend);
        session.start().await.unwrap();
        drop(remote);

        assert!(session.wait_stopped(Duration::from_secs(1)).await);
        assert_eq!(session.stop_reason(), Some(StopReason::RemoteClosed));
        assert!(!backend.device().is_capturing());
    }

    #[tokio::test]
    async fn test_playback_decodes_into_device() {
        let backend = MockBackend::new();
        let device = backend.device();
        let (local, mut remote) = memory::pair(4);

        let session = session(Direction::Playback, local, &backend);
        session.start().await.unwrap();
        assert!(device.is_playing());

        let samples: Vec<f32> = (0..FRAME).map(|i| (i as f32 * 0.3).sin()).collect();
        let encoded = FrameEncoder::new(FRAME).encode(&samples).unwrap();
        remote.send_frame(encoded).await.unwrap();

        eventually("decoded frame", || session.frames_transferred() == 1).await;
        assert_eq!(device.pull(FRAME).unwrap(), samples);
        assert_eq!(session.bytes_transferred(), (FRAME * 4) as u64);

        // A malformed frame is counted as received, dropped, and survived
        remote.send_frame(Bytes::from_static(&[1, 2, 3])).await.unwrap();
        eventually("malformed frame", || session.bytes_transferred() == (FRAME * 4 + 3) as u64).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(session.is_streaming());
        assert_eq!(session.frames_transferred(), 1);

        remote.close().await;
        assert!(session.wait_stopped(Duration::from_secs(1)).await);
        assert_eq!(session.stop_reason(), Some(StopReason::RemoteClosed));
        assert!(!device.is_playing());
    }

    #[tokio::test]
    async fn test_device_open_failure_closes_transport() {
        let backend = MockBackend::new();
        backend.device().set_fail_open(true);
        let (local, mut remote) = memory::pair(4);

        let session = session(Direction::Capture, local, &backend);
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, Error::Audio(AudioError::DeviceOpen(_))));

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.stop_reason(), Some(StopReason::DeviceUnavailable));
        assert!(remote.recv_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_is_single_shot() {
        let backend = MockBackend::new();
        let (local, _remote) = memory::pair(4);

        let session = session(Direction::Capture, local, &backend);
        session.start().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(Error::Session(SessionError::AlreadyStarted(_)))
        ));
        session.stop();
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let backend = MockBackend::new();
        let (local, mut remote) = memory::pair(4);

        let session = session(Direction::Capture, local, &backend);
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.elapsed(), Duration::ZERO);
        assert!(remote.recv_frame().await.unwrap().is_none());

        assert!(matches!(
            session.start().await,
            Err(Error::Session(SessionError::Stopped(_)))
        ));
        assert_eq!(backend.device().opened_count(), 0);
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let backend = MockBackend::new();
        let (local, _remote) = memory::pair(4);
        let session = session(Direction::Capture, local, &backend);
        session.start().await.unwrap();

        let json = serde_json::to_value(session.report()).unwrap();
        assert_eq!(json["peer"], "10.0.0.7");
        assert_eq!(json["direction"], "capture");
        assert_eq!(json["state"], "streaming");
        assert!(json.get("stop_reason").is_none());

        session.stop();
    }
}
