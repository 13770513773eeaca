//! Protocol state machine: what each inbound message does to the rooms and
//! who hears about it.

use crate::config::{RelayConfig, DEFAULT_ROOM};
use crate::connection::{SessionContext, SessionState};
use crate::engine::{EngineFactory, IceCandidate, SessionDescription};
use crate::error::{RelayError, Result};
use crate::peer::{ConnectionId, PeerHandle};
use crate::room::{Room, RoomRegistry};
use crate::signaling::{Envelope, MessageType};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the session loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

#[derive(Debug, Clone, Copy)]
enum Negotiation {
    Offer,
    Answer,
    Candidate,
}

async fn bounded<T>(
    limit: Option<Duration>,
    op: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RelayError::EngineTimeout(op))?,
    }
}

async fn deliver(handle: &PeerHandle, envelope: &Envelope) {
    if let Err(e) = handle.send(envelope).await {
        warn!(
            peer_id = %handle.peer_id(),
            kind = %envelope.kind,
            "Send failed: {}", e
        );
    }
}

/// The leave effect. Safe to repeat: only the first call for a given
/// connection's membership finds anything to remove.
async fn depart(
    registry: &RoomRegistry,
    room_id: &str,
    peer_id: &str,
    connection: ConnectionId,
    engine_timeout: Option<Duration>,
) -> bool {
    let Some(room) = registry.get(room_id) else {
        debug!(room_id, peer_id, "Room already gone, nothing to clean up");
        return false;
    };
    let Some(handle) = room.remove_member_for(peer_id, connection) else {
        debug!(room_id, peer_id, "Peer already removed");
        return false;
    };
    info!(room_id, peer_id, conn = %connection, "Peer left");

    registry.remove_if_empty(room_id);
    room.broadcast(&Envelope::participant_left(room_id, peer_id), peer_id)
        .await;

    if let Err(e) = bounded(engine_timeout, "close", handle.engine().close()).await {
        warn!(room_id, peer_id, "Failed to close negotiation engine: {}", e);
    }
    true
}

#[derive(Clone)]
pub struct Router {
    registry: Arc<RoomRegistry>,
    engines: Arc<dyn EngineFactory>,
    default_room: String,
    engine_timeout: Option<Duration>,
}

impl Router {
    pub fn new(registry: Arc<RoomRegistry>, engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            registry,
            engines,
            default_room: DEFAULT_ROOM.to_string(),
            engine_timeout: None,
        }
    }

    pub fn from_config(
        registry: Arc<RoomRegistry>,
        engines: Arc<dyn EngineFactory>,
        config: &RelayConfig,
    ) -> Self {
        Self::new(registry, engines)
            .with_default_room(config.default_room.clone())
            .with_engine_timeout(config.engine_timeout())
    }

    pub fn with_default_room(mut self, room_id: impl Into<String>) -> Self {
        self.default_room = room_id.into();
        self
    }

    pub fn with_engine_timeout(mut self, limit: Option<Duration>) -> Self {
        self.engine_timeout = limit;
        self
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, session: &mut SessionContext, envelope: Envelope) -> Flow {
        debug!(
            conn = %session.id(),
            kind = %envelope.kind,
            sender_id = %envelope.sender_id,
            "Inbound message"
        );

        match envelope.kind {
            MessageType::Join => self.join(session, envelope).await,
            MessageType::Offer => self.negotiate(session, envelope, Negotiation::Offer).await,
            MessageType::Answer => self.negotiate(session, envelope, Negotiation::Answer).await,
            MessageType::Candidate => {
                self.negotiate(session, envelope, Negotiation::Candidate)
                    .await
            }
            MessageType::GetParticipants => self.get_participants(session).await,
            MessageType::Leave => return self.leave(session).await,
            MessageType::Joined
            | MessageType::NewParticipant
            | MessageType::ParticipantLeft
            | MessageType::ParticipantsList => {
                warn!(
                    conn = %session.id(),
                    kind = %envelope.kind,
                    "Relay-only message type sent by client, ignoring"
                );
            }
        }
        Flow::Continue
    }

    /// Runs the leave effect for a session that is going away without having
    /// said `leave`. Calling it again is a no-op.
    pub async fn terminate(&self, session: &mut SessionContext) {
        let previous = session.take_state();
        if let SessionState::Joined { room_id, peer_id } = previous {
            depart(
                &self.registry,
                &room_id,
                &peer_id,
                session.id(),
                self.engine_timeout,
            )
            .await;
        }
    }

    /// Removes `peer_id` from `room_id` if `connection` still owns it.
    pub async fn depart(&self, room_id: &str, peer_id: &str, connection: ConnectionId) -> bool {
        depart(
            &self.registry,
            room_id,
            peer_id,
            connection,
            self.engine_timeout,
        )
        .await
    }

    async fn join(&self, session: &mut SessionContext, envelope: Envelope) {
        let conn = session.id();
        if *session.state() != SessionState::Unjoined {
            warn!(%conn, state = ?session.state(), "Join ignored, session already joined");
            return;
        }
        if envelope.sender_id.is_empty() {
            warn!(%conn, "Join without sender_id ignored");
            return;
        }

        let room_id = envelope
            .room()
            .unwrap_or(self.default_room.as_str())
            .to_string();
        let peer_id = envelope.sender_id;

        let engine = match bounded(self.engine_timeout, "create", self.engines.create()).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!(%conn, %room_id, %peer_id, "Failed to create negotiation engine: {}", e);
                return;
            }
        };
        let handle = Arc::new(PeerHandle::new(
            peer_id.clone(),
            conn,
            session.channel().clone(),
            engine,
        ));

        let (room, displaced) = self.registry.admit(&room_id, handle.clone());
        if let Some(previous) = displaced {
            warn!(
                %room_id,
                %peer_id,
                previous = %previous.connection(),
                "Peer id rejoined, replacing previous handle"
            );
            if let Err(e) = bounded(self.engine_timeout, "close", previous.engine().close()).await {
                warn!(%room_id, %peer_id, "Failed to close replaced engine: {}", e);
            }
        }

        session.set_state(SessionState::Joined {
            room_id: room_id.clone(),
            peer_id: peer_id.clone(),
        });
        info!(%conn, %room_id, %peer_id, members = room.len(), "Peer joined");

        self.subscribe(&handle, &room_id, session);

        deliver(&handle, &Envelope::joined(&room_id, &peer_id)).await;
        room.broadcast(&Envelope::new_participant(&room_id, &peer_id), &peer_id)
            .await;
        let others = room.snapshot_member_ids(Some(&peer_id));
        deliver(
            &handle,
            &Envelope::participants_list(&room_id, &peer_id, others),
        )
        .await;
    }

    /// Hooks the peer's engine: local candidates go back to the peer, and a
    /// terminal connection state runs the leave effect and ends the session.
    fn subscribe(&self, handle: &Arc<PeerHandle>, room_id: &str, session: &SessionContext) {
        let peer: Weak<PeerHandle> = Arc::downgrade(handle);
        let candidate_room = room_id.to_string();
        handle
            .engine()
            .on_local_candidate(Box::new(move |candidate: IceCandidate| -> BoxFuture<'static, ()> {
                let peer = peer.clone();
                let room_id = candidate_room.clone();
                Box::pin(async move {
                    let Some(peer) = peer.upgrade() else {
                        return;
                    };
                    match Envelope::new(MessageType::Candidate, &room_id, peer.peer_id())
                        .with_payload(&candidate)
                    {
                        Ok(envelope) => deliver(&peer, &envelope).await,
                        Err(e) => warn!("Failed to encode local candidate: {}", e),
                    }
                })
            }));

        let registry: Weak<RoomRegistry> = Arc::downgrade(&self.registry);
        let room_id = room_id.to_string();
        let peer_id = handle.peer_id().to_string();
        let connection = handle.connection();
        let engine_timeout = self.engine_timeout;
        let disconnected = session.disconnect_signal();
        handle
            .engine()
            .on_disconnected(Box::new(move || -> BoxFuture<'static, ()> {
                let registry = registry.clone();
                let room_id = room_id.clone();
                let peer_id = peer_id.clone();
                let disconnected = disconnected.clone();
                Box::pin(async move {
                    info!(%room_id, %peer_id, conn = %connection, "Negotiation engine disconnected");
                    if let Some(registry) = registry.upgrade() {
                        depart(&registry, &room_id, &peer_id, connection, engine_timeout).await;
                    }
                    disconnected.notify_one();
                })
            }));
    }

    /// The room and handle a joined session speaks for, if it still owns them.
    fn sender(&self, session: &SessionContext) -> Option<(Arc<Room>, Arc<PeerHandle>)> {
        let conn = session.id();
        let SessionState::Joined { room_id, peer_id } = session.state() else {
            warn!(%conn, state = ?session.state(), "Message requires a joined session, ignoring");
            return None;
        };
        let Some(room) = self.registry.get(room_id) else {
            debug!(%conn, %room_id, "Room no longer exists");
            return None;
        };
        match room.member(peer_id) {
            Some(handle) if handle.connection() == conn => Some((room, handle)),
            _ => {
                debug!(%conn, %room_id, %peer_id, "Session no longer owns its peer id");
                None
            }
        }
    }

    async fn negotiate(&self, session: &SessionContext, envelope: Envelope, step: Negotiation) {
        let Some((room, sender)) = self.sender(session) else {
            return;
        };

        if let Some(target) = envelope.target() {
            match room.member(target) {
                Some(peer) => {
                    debug!(
                        room_id = %room.id(),
                        from = %sender.peer_id(),
                        to = target,
                        kind = %envelope.kind,
                        "Forwarding"
                    );
                    deliver(&peer, &envelope).await;
                }
                None => debug!(room_id = %room.id(), target, "Target not in room, dropping"),
            }
            return;
        }

        if let Err(e) = self.negotiate_locally(room.id(), &sender, &envelope, step).await {
            warn!(
                room_id = %room.id(),
                peer_id = %sender.peer_id(),
                kind = %envelope.kind,
                "Negotiation failed: {}", e
            );
        }
    }

    /// Applies an untargeted offer/answer/candidate to the sender's own
    /// engine. An offer is answered back to the sender.
    async fn negotiate_locally(
        &self,
        room_id: &str,
        sender: &PeerHandle,
        envelope: &Envelope,
        step: Negotiation,
    ) -> Result<()> {
        let engine = sender.engine();
        match step {
            Negotiation::Offer => {
                let offer: SessionDescription = envelope.decode_payload()?;
                bounded(
                    self.engine_timeout,
                    "set_remote_description",
                    engine.set_remote_description(offer),
                )
                .await?;
                let answer =
                    bounded(self.engine_timeout, "create_answer", engine.create_answer()).await?;
                bounded(
                    self.engine_timeout,
                    "set_local_description",
                    engine.set_local_description(answer.clone()),
                )
                .await?;
                let reply = Envelope::new(MessageType::Answer, room_id, sender.peer_id())
                    .with_payload(&answer)?;
                sender.send(&reply).await?;
            }
            Negotiation::Answer => {
                let answer: SessionDescription = envelope.decode_payload()?;
                bounded(
                    self.engine_timeout,
                    "set_remote_description",
                    engine.set_remote_description(answer),
                )
                .await?;
            }
            Negotiation::Candidate => {
                let candidate: IceCandidate = envelope.decode_payload()?;
                bounded(
                    self.engine_timeout,
                    "add_ice_candidate",
                    engine.add_ice_candidate(candidate),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn get_participants(&self, session: &SessionContext) {
        let Some((room, sender)) = self.sender(session) else {
            return;
        };
        let peers = room.snapshot_member_ids(Some(sender.peer_id()));
        deliver(
            &sender,
            &Envelope::participants_list(room.id(), sender.peer_id(), peers),
        )
        .await;
    }

    async fn leave(&self, session: &mut SessionContext) -> Flow {
        if !matches!(session.state(), SessionState::Joined { .. }) {
            warn!(conn = %session.id(), state = ?session.state(), "Leave before join ignored");
            return Flow::Continue;
        }
        self.terminate(session).await;
        Flow::Terminate
    }
}
