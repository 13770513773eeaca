use crate::error::RelayError;
use crate::peer::ConnectionId;
use crate::router::{Flow, Router};
use crate::signaling::Envelope;
use crate::transport::{FrameSink, FrameSource, PeerChannel};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined { room_id: String, peer_id: String },
    /// Terminal; the session is discarded.
    Left,
}

/// The per-connection cell the router reads and updates.
pub struct SessionContext {
    id: ConnectionId,
    channel: PeerChannel,
    state: SessionState,
    disconnected: Arc<Notify>,
}

impl SessionContext {
    pub fn new(channel: PeerChannel) -> Self {
        Self {
            id: ConnectionId::random(),
            channel,
            state: SessionState::Unjoined,
            disconnected: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &PeerChannel {
        &self.channel
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Moves the session to `Left`, returning the state it was in.
    pub(crate) fn take_state(&mut self) -> SessionState {
        std::mem::replace(&mut self.state, SessionState::Left)
    }

    /// Fired when the peer's negotiation engine reports a terminal state.
    pub(crate) fn disconnect_signal(&self) -> Arc<Notify> {
        self.disconnected.clone()
    }
}

/// Read loop for one accepted connection.
pub struct ConnectionSession<S> {
    router: Router,
    source: S,
    context: SessionContext,
}

impl<S: FrameSource> ConnectionSession<S> {
    pub fn new(router: Router, source: S, sink: impl FrameSink + 'static) -> Self {
        Self {
            router,
            source,
            context: SessionContext::new(PeerChannel::new(sink)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.context.id()
    }

    /// Runs until the client leaves, the channel closes, or the engine
    /// disconnects; a joined peer is always cleaned up on the way out.
    pub async fn run(mut self) {
        let conn = self.context.id();
        let disconnected = self.context.disconnect_signal();
        debug!(%conn, "Session started");

        loop {
            let frame = tokio::select! {
                frame = self.source.receive() => frame,
                _ = disconnected.notified() => {
                    info!(%conn, "Negotiation engine disconnected, ending session");
                    break;
                }
            };

            let text = match frame {
                Ok(text) => text,
                Err(RelayError::Closed) => {
                    debug!(%conn, "Connection closed by client");
                    break;
                }
                Err(e) => {
                    warn!(%conn, "Read error: {}", e);
                    break;
                }
            };

            let envelope = match Envelope::decode(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(%conn, "Dropping undecodable message: {}", e);
                    continue;
                }
            };

            if self.router.dispatch(&mut self.context, envelope).await == Flow::Terminate {
                break;
            }
        }

        self.router.terminate(&mut self.context).await;
        debug!(%conn, "Session ended");
    }
}
