//! Connect/disconnect handshake over HTTP
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /connect` | start a session for the requester, replacing its old one |
//! | `GET /disconnect` | stop the requester's session; 404 if it has none |
//! | `GET /status` | listening flag and a report per live session |
//! | `GET /devices` | audio devices on this host |

pub mod handlers;
pub mod server;

pub use handlers::{ApiResponse, ServerStatus};
pub use server::{AppState, HandshakeServer};
