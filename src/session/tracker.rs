//! Sliding-window failure tracker
//!
//! Each recorded failure holds one of `capacity` slots for `window`, then
//! frees it on its own. A caller that finds every slot taken has seen too
//! many failures too quickly and should give up on the peer.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub struct FailureTracker {
    capacity: usize,
    window: Duration,
    /// Times of the failures still inside the window, oldest first
    tokens: Mutex<VecDeque<Instant>>,
}

impl FailureTracker {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            tokens: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record one failure.
    ///
    /// Returns `true` if it was tolerated, `false` if the tracker is already
    /// at capacity (the failure is not recorded).
    pub fn record_failure(&self) -> bool {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        self.expire(&mut tokens, now);

        if tokens.len() >= self.capacity {
            return false;
        }
        tokens.push_back(now);
        true
    }

    /// Failures currently inside the window
    pub fn recent(&self) -> usize {
        let mut tokens = self.tokens.lock();
        self.expire(&mut tokens, Instant::now());
        tokens.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn expire(&self, tokens: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = tokens.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            tokens.pop_front();
        }
    }
}

impl std::fmt::Debug for FailureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureTracker")
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .field("recent", &self.recent())
            .finish()
    }
}
