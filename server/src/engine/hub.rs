use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{Outbound, ServerEvent};
use crate::db::models::UserRow;

/// Unique identifier for a live connection (one per socket, not per user).
pub type ConnectionId = Uuid;

/// An authenticated real-time connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub name: String,
    pub role: String,
    /// Bounded so a slow client cannot grow memory without limit.
    outbound: mpsc::Sender<Outbound>,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    /// Queue a frame for this connection. Returns false if the connection is
    /// gone or its queue is full; the frame is dropped rather than blocking.
    pub fn send(&self, frame: Outbound) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    pub fn connected_for(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Registry of live connections and the room channels they listen on.
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    /// room ID -> connections receiving that room's broadcasts.
    channels: DashMap<String, HashSet<ConnectionId>>,
    queue_bound: usize,
}

impl ConnectionHub {
    pub fn new(queue_bound: usize) -> Self {
        Self {
            connections: DashMap::new(),
            channels: DashMap::new(),
            queue_bound: queue_bound.max(1),
        }
    }

    /// Register an authenticated connection. The receiver feeds the
    /// connection's writer.
    pub fn register(&self, user: &UserRow) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.queue_bound);
        let conn = Arc::new(Connection {
            id: Uuid::new_v4(),
            user_id: user.id.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            outbound: tx,
            connected_at: Utc::now(),
        });
        self.connections.insert(conn.id, conn.clone());
        info!(
            connection_id = %conn.id,
            user_id = %conn.user_id,
            connections = self.connection_count(),
            "connection registered"
        );
        (conn, rx)
    }

    /// Forget a connection and remove it from every channel.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        let (_, conn) = self.connections.remove(&connection_id)?;
        self.channels.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
        info!(
            %connection_id,
            user_id = %conn.user_id,
            connected_secs = conn.connected_for().num_seconds(),
            connections = self.connection_count(),
            "connection unregistered"
        );
        Some(conn)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).map(|c| c.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ── Room channels ───────────────────────────────────────────────

    pub fn join_channel(&self, room_id: &str, connection_id: ConnectionId) {
        self.channels
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);
    }

    pub fn leave_channel(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .channels
            .get_mut(room_id)
            .is_some_and(|mut members| members.remove(&connection_id));
        self.channels.remove_if(room_id, |_, members| members.is_empty());
        removed
    }

    /// Remove every connection from a room's channel. Returns who was removed.
    pub fn evict_room(&self, room_id: &str) -> Vec<ConnectionId> {
        let evicted: Vec<ConnectionId> = self
            .channels
            .remove(room_id)
            .map(|(_, members)| members.into_iter().collect())
            .unwrap_or_default();
        debug!(%room_id, count = evicted.len(), "room channel evicted");
        evicted
    }

    pub fn channel_members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.channels
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Connections of `user_id` currently listening on a room's channel.
    pub fn connections_of_user_in_room(&self, room_id: &str, user_id: &str) -> Vec<ConnectionId> {
        self.channel_members(room_id)
            .into_iter()
            .filter(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|conn| conn.user_id == user_id)
            })
            .collect()
    }

    // ── Delivery ────────────────────────────────────────────────────

    /// Send an event to every connection on a room's channel.
    pub fn broadcast(&self, room_id: &str, event: &ServerEvent, exclude: Option<ConnectionId>) {
        // Snapshot members first so the channel lock is not held while
        // touching the connection map.
        for member_id in self.channel_members(room_id) {
            if Some(member_id) == exclude {
                continue;
            }
            if let Some(conn) = self.get(member_id)
                && !conn.send(Outbound::Event(event.clone()))
            {
                warn!(%member_id, %room_id, "dropped event for slow or closed connection");
            }
        }
    }

    pub fn send_to(&self, connection_id: ConnectionId, frame: Outbound) -> bool {
        let Some(conn) = self.get(connection_id) else {
            return false;
        };
        let sent = conn.send(frame);
        if !sent {
            warn!(%connection_id, "dropped frame for slow or closed connection");
        }
        sent
    }

    /// Send an event to the given connections. Returns how many accepted it.
    pub fn send_to_all(&self, connection_ids: &[ConnectionId], event: &ServerEvent) -> usize {
        connection_ids
            .iter()
            .filter(|id| self.send_to(**id, Outbound::Event(event.clone())))
            .count()
    }

    /// Send an event to every connection of a user, in any room.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .collect();
        self.send_to_all(&targets, event)
    }
}
