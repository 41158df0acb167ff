//! Streaming sessions and their bookkeeping

pub mod registry;
pub mod stream;
pub mod tracker;

pub use registry::SessionRegistry;
pub use stream::{Direction, SessionReport, SessionState, StopReason, StreamingSession};
pub use tracker::FailureTracker;
