//! Rooms and the registry that owns them.

pub mod registry;

pub use registry::RoomRegistry;

use crate::peer::{ConnectionId, PeerHandle};
use crate::signaling::Envelope;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Returned by [`Room::add_member`] when the registry has already dropped
/// the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomClosed;

#[derive(Default)]
struct Membership {
    peers: BTreeMap<String, Arc<PeerHandle>>,
    /// Set once the registry removes the room; no member may be added after.
    closed: bool,
}

pub struct Room {
    id: String,
    created_at: SystemTime,
    members: RwLock<Membership>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            created_at: SystemTime::now(),
            members: RwLock::new(Membership::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    // Lock guards never cross an await, so a poisoned lock still holds
    // consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Membership> {
        self.members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Membership> {
        self.members.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts `handle` under its peer id. A handle already stored under that
    /// id is replaced and returned.
    pub fn add_member(
        &self,
        handle: Arc<PeerHandle>,
    ) -> Result<Option<Arc<PeerHandle>>, RoomClosed> {
        let mut members = self.write();
        if members.closed {
            return Err(RoomClosed);
        }
        Ok(members.peers.insert(handle.peer_id().to_string(), handle))
    }

    pub fn remove_member(&self, peer_id: &str) -> Option<Arc<PeerHandle>> {
        self.write().peers.remove(peer_id)
    }

    /// Removes `peer_id` only if it is still held by `connection`; a later
    /// join under the same id from another connection is left alone.
    pub fn remove_member_for(
        &self,
        peer_id: &str,
        connection: ConnectionId,
    ) -> Option<Arc<PeerHandle>> {
        let mut members = self.write();
        let owned = members
            .peers
            .get(peer_id)
            .is_some_and(|handle| handle.connection() == connection);
        if owned {
            members.peers.remove(peer_id)
        } else {
            None
        }
    }

    pub fn member(&self, peer_id: &str) -> Option<Arc<PeerHandle>> {
        self.read().peers.get(peer_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().peers.is_empty()
    }

    /// Member ids in ascending order, optionally leaving one out.
    pub fn snapshot_member_ids(&self, excluding: Option<&str>) -> Vec<String> {
        self.read()
            .peers
            .keys()
            .filter(|id| Some(id.as_str()) != excluding)
            .cloned()
            .collect()
    }

    /// Marks the room closed if it has no members. Returns whether it did.
    pub(crate) fn close_if_empty(&self) -> bool {
        let mut members = self.write();
        if members.peers.is_empty() {
            members.closed = true;
        }
        members.closed
    }

    /// Sends `envelope` to every member except `exclude`. Membership is
    /// snapshotted under the lock; the sends happen after it is released and
    /// one failing peer does not stop the rest. Returns how many succeeded.
    pub async fn broadcast(&self, envelope: &Envelope, exclude: &str) -> usize {
        let recipients: Vec<Arc<PeerHandle>> = self
            .read()
            .peers
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .map(|(_, handle)| handle.clone())
            .collect();

        let mut delivered = 0;
        for handle in recipients {
            match handle.send(envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    room_id = %self.id,
                    peer_id = %handle.peer_id(),
                    kind = %envelope.kind,
                    "Broadcast send failed: {}", e
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::MessageType;
    use crate::testing;

    #[test]
    fn rejoining_under_the_same_id_replaces_the_handle() {
        let room = Room::new("r1".into());
        let (first, _, _) = testing::peer("A");
        let (second, _, _) = testing::peer("A");

        assert!(room.add_member(first.clone()).unwrap().is_none());
        let displaced = room.add_member(second.clone()).unwrap().unwrap();

        assert!(Arc::ptr_eq(&displaced, &first));
        assert_eq!(room.len(), 1);
        assert!(Arc::ptr_eq(&room.member("A").unwrap(), &second));
    }

    #[test]
    fn snapshot_is_sorted_and_skips_the_excluded_id() {
        let room = Room::new("r1".into());
        for id in ["C", "A", "B"] {
            room.add_member(testing::peer(id).0).unwrap();
        }
        assert_eq!(room.snapshot_member_ids(None), vec!["A", "B", "C"]);
        assert_eq!(room.snapshot_member_ids(Some("B")), vec!["A", "C"]);
        assert_eq!(room.snapshot_member_ids(Some("nobody")).len(), 3);
    }

    #[test]
    fn remove_member_for_ignores_other_connections() {
        let room = Room::new("r1".into());
        let (old, _, _) = testing::peer("A");
        let (new, _, _) = testing::peer("A");
        room.add_member(old.clone()).unwrap();
        room.add_member(new.clone()).unwrap();

        assert!(room.remove_member_for("A", old.connection()).is_none());
        assert_eq!(room.len(), 1);
        assert!(room.remove_member_for("A", new.connection()).is_some());
        assert!(room.is_empty());
        assert!(room.remove_member("A").is_none());
    }

    #[test]
    fn closed_room_refuses_members() {
        let room = Room::new("r1".into());
        room.add_member(testing::peer("A").0).unwrap();
        assert!(!room.close_if_empty());

        room.remove_member("A");
        assert!(room.close_if_empty());
        assert!(matches!(
            room.add_member(testing::peer("B").0),
            Err(RoomClosed)
        ));
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_and_survives_failures() {
        let room = Room::new("r1".into());
        let (a, sink_a, _) = testing::peer("A");
        let (b, sink_b, _) = testing::peer("B");
        let (c, sink_c, _) = testing::peer("C");
        let (d, sink_d, _) = testing::peer("D");
        for handle in [a, b, c, d] {
            room.add_member(handle).unwrap();
        }
        sink_b.set_failing(true);

        let delivered = room
            .broadcast(&Envelope::new_participant("r1", "A"), "A")
            .await;

        assert_eq!(delivered, 2);
        assert!(sink_a.envelopes().is_empty());
        assert!(sink_b.envelopes().is_empty());
        assert_eq!(sink_c.kinds(), vec![MessageType::NewParticipant]);
        assert_eq!(sink_d.kinds(), vec![MessageType::NewParticipant]);
        assert_eq!(sink_d.envelopes()[0].sender_id, "A");
    }
}
