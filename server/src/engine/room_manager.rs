use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use super::hub::ConnectionId;
use crate::error::{RoomError, RoomResult};

/// Snapshot of one live connection's presence in a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: String,
    pub name: String,
    pub mood: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// Aggregate live counters for a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub current_count: usize,
    pub peak_count: usize,
    pub message_count: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinCounts {
    pub current_count: usize,
    pub peak_count: usize,
}

/// The connection currently designated as a room's media source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcaster {
    pub connection_id: ConnectionId,
    pub user_id: String,
}

#[derive(Debug)]
struct RoomState {
    participants: HashMap<ConnectionId, ParticipantInfo>,
    peak_count: usize,
    message_count: u64,
    started_at: DateTime<Utc>,
    broadcaster: Option<Broadcaster>,
}

impl RoomState {
    fn new() -> Self {
        Self {
            participants: HashMap::new(),
            peak_count: 0,
            message_count: 0,
            started_at: Utc::now(),
            broadcaster: None,
        }
    }

    fn insert(&mut self, connection_id: ConnectionId, info: ParticipantInfo) -> JoinCounts {
        self.participants.insert(connection_id, info);
        self.peak_count = self.peak_count.max(self.participants.len());
        JoinCounts {
            current_count: self.participants.len(),
            peak_count: self.peak_count,
        }
    }

    fn stats(&self) -> RoomStats {
        RoomStats {
            current_count: self.participants.len(),
            peak_count: self.peak_count,
            message_count: self.message_count,
            started_at: self.started_at,
        }
    }
}

/// In-process view of who is live in which room. Each room's state sits
/// behind its own map shard lock, so rooms never contend with each other.
/// State for a room exists only while at least one connection is joined.
#[derive(Default)]
pub struct RoomManager {
    rooms: DashMap<String, RoomState>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in a room. Re-registering a connection
    /// overwrites its previous snapshot.
    pub fn join_room(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
        info: ParticipantInfo,
    ) -> JoinCounts {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut e) => e.get_mut().insert(connection_id, info),
            Entry::Vacant(e) => {
                let mut state = RoomState::new();
                let counts = state.insert(connection_id, info);
                e.insert(state);
                counts
            }
        }
    }

    /// Like [`join_room`](Self::join_room) but refuses a new connection when
    /// the room already holds `capacity` connections. The check and the
    /// insert happen under the same lock. A connection that is already
    /// registered is never refused.
    pub fn try_join_room(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
        info: ParticipantInfo,
        capacity: Option<usize>,
    ) -> Option<JoinCounts> {
        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut e) => {
                let state = e.get_mut();
                let is_new = !state.participants.contains_key(&connection_id);
                if is_new && capacity.is_some_and(|cap| state.participants.len() >= cap) {
                    return None;
                }
                Some(state.insert(connection_id, info))
            }
            Entry::Vacant(e) => {
                if capacity == Some(0) {
                    return None;
                }
                let mut state = RoomState::new();
                let counts = state.insert(connection_id, info);
                e.insert(state);
                Some(counts)
            }
        }
    }

    /// Remove a connection. Drops the room's state when it empties.
    pub fn leave_room(&self, room_id: &str, connection_id: ConnectionId) -> Option<ParticipantInfo> {
        let Entry::Occupied(mut e) = self.rooms.entry(room_id.to_string()) else {
            return None;
        };

        let removed = e.get_mut().participants.remove(&connection_id)?;
        let state = e.get_mut();
        if state
            .broadcaster
            .as_ref()
            .is_some_and(|b| b.connection_id == connection_id)
        {
            state.broadcaster = None;
        }
        if state.participants.is_empty() {
            e.remove();
        }
        Some(removed)
    }

    /// Drop a room's state outright. Returns the final counters.
    pub fn remove_room(&self, room_id: &str) -> Option<RoomStats> {
        self.rooms.remove(room_id).map(|(_, state)| state.stats())
    }

    pub fn get_participants(&self, room_id: &str) -> Vec<ParticipantInfo> {
        self.rooms
            .get(room_id)
            .map(|state| state.participants.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_stats(&self, room_id: &str) -> Option<RoomStats> {
        self.rooms.get(room_id).map(|state| state.stats())
    }

    pub fn participant_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|state| state.participants.len())
            .unwrap_or(0)
    }

    pub fn increment_message_count(&self, room_id: &str) {
        if let Some(mut state) = self.rooms.get_mut(room_id) {
            state.message_count += 1;
        }
    }

    pub fn is_connection_in_room(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|state| state.participants.contains_key(&connection_id))
    }

    /// Every room the connection is registered in.
    pub fn rooms_for_connection(&self, connection_id: ConnectionId) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|state| state.participants.contains_key(&connection_id))
            .map(|state| state.key().clone())
            .collect()
    }

    /// Connections a user currently has registered in a room.
    pub fn connections_for_user(&self, room_id: &str, user_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|state| {
                state
                    .participants
                    .iter()
                    .filter(|(_, p)| p.user_id == user_id)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Broadcaster slot ────────────────────────────────────────────

    /// Claim the broadcaster slot. The same user may replace their own
    /// broadcaster connection; anyone else is refused while it is held.
    pub fn set_broadcaster(&self, room_id: &str, broadcaster: Broadcaster) -> RoomResult<()> {
        let Some(mut state) = self.rooms.get_mut(room_id) else {
            return Err(RoomError::NotFound("room has no live participants".into()));
        };

        if let Some(current) = &state.broadcaster
            && current.user_id != broadcaster.user_id
        {
            return Err(RoomError::Conflict("broadcaster already set".into()));
        }

        state.broadcaster = Some(broadcaster);
        Ok(())
    }

    pub fn get_broadcaster(&self, room_id: &str) -> Option<Broadcaster> {
        self.rooms
            .get(room_id)
            .and_then(|state| state.broadcaster.clone())
    }

    pub fn clear_broadcaster(&self, room_id: &str) -> Option<Broadcaster> {
        self.rooms
            .get_mut(room_id)
            .and_then(|mut state| state.broadcaster.take())
    }
}
