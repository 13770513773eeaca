//! Multi-room WebRTC signaling relay.
//!
//! Clients connect over a WebSocket, join a room under a self-chosen peer id,
//! and exchange offers, answers and ICE candidates. A message naming a
//! `target_id` is forwarded verbatim to that peer; one without a target is
//! negotiated against the sender's own server-side engine.

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod peer;
pub mod room;
pub mod router;
pub mod server;
pub mod signaling;
pub mod transport;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use room::RoomRegistry;
pub use router::Router;
pub use server::SignalingServer;
pub use signaling::{Envelope, MessageType};
