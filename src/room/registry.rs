use super::Room;
use crate::peer::PeerHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Maps room ids to live rooms.
///
/// The registry lock only covers creating and dropping rooms. Each room's
/// membership has its own lock, taken after the registry lock when both are
/// needed. Neither is held across an await.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        self.rooms()
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!(room_id, "Room created");
                Arc::new(Room::new(room_id.to_string()))
            })
            .clone()
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms().get(room_id).cloned()
    }

    /// Adds `handle` to the named room, creating the room if needed.
    ///
    /// Returns the room plus any handle displaced under the same peer id. If
    /// the room is closed between lookup and insert, a fresh one is created.
    pub fn admit(
        &self,
        room_id: &str,
        handle: Arc<PeerHandle>,
    ) -> (Arc<Room>, Option<Arc<PeerHandle>>) {
        loop {
            let room = self.get_or_create(room_id);
            if let Ok(displaced) = room.add_member(handle.clone()) {
                return (room, displaced);
            }
        }
    }

    /// Drops the room if it has no members. Returns whether it was removed.
    pub fn remove_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get(room_id) else {
            return false;
        };
        if !room.close_if_empty() {
            return false;
        }
        if let Some(room) = rooms.remove(room_id) {
            info!(
                room_id,
                lifetime_secs = room.age().as_secs(),
                "Room destroyed"
            );
        }
        true
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms().contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms().is_empty()
    }

    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms().keys().cloned().collect();
        ids.sort();
        ids
    }
}
