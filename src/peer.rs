use crate::engine::NegotiationEngine;
use crate::error::Result;
use crate::signaling::Envelope;
use crate::transport::PeerChannel;
use std::fmt;
use std::sync::Arc;

/// Identifies one accepted connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:016x}", self.0)
    }
}

/// A joined participant: its id, the connection it came in on, its outbound
/// channel and its negotiation engine.
pub struct PeerHandle {
    peer_id: String,
    connection: ConnectionId,
    channel: PeerChannel,
    engine: Arc<dyn NegotiationEngine>,
}

impl PeerHandle {
    pub fn new(
        peer_id: String,
        connection: ConnectionId,
        channel: PeerChannel,
        engine: Arc<dyn NegotiationEngine>,
    ) -> Self {
        Self {
            peer_id,
            connection,
            channel,
            engine,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn engine(&self) -> &Arc<dyn NegotiationEngine> {
        &self.engine
    }

    /// Serialized with every other write to this peer.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.channel.send(envelope).await
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("peer_id", &self.peer_id)
            .field("connection", &self.connection)
            .finish()
    }
}
