use dashmap::DashMap;
use matinee_proto::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Handle to one connected peer's outbound message queue.
#[derive(Clone)]
pub struct PeerHandle {
    pub peer_id: String,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Room membership: room id -> (peer id -> handle).
///
/// Rooms come into existence on first join and disappear when their last
/// member leaves; the map never holds a peer that is not currently
/// connected.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, DashMap<String, PeerHandle>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Add a peer to a room. Idempotent; re-joining replaces the handle.
    pub fn join(&self, room: &str, peer: PeerHandle) {
        let members = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(DashMap::new);
        if members.insert(peer.peer_id.clone(), peer).is_none() {
            info!(room = %room, "peer joined room");
        }
    }

    /// Deliver a message to every member of `room` except `sender_id`.
    /// Unknown or empty rooms are a silent no-op.
    pub fn broadcast_except(&self, room: &str, sender_id: &str, message: ServerMessage) {
        if let Some(members) = self.rooms.get(room) {
            for member in members.iter() {
                if member.peer_id != sender_id {
                    let _ = member.tx.send(message.clone());
                }
            }
        }
    }

    /// Drop a peer from every room it joined, removing rooms that empty
    /// out. No notification is sent to the members left behind.
    pub fn remove_everywhere(&self, peer_id: &str) {
        let mut emptied = Vec::new();
        for entry in self.rooms.iter() {
            if entry.value().remove(peer_id).is_some() && entry.value().is_empty() {
                emptied.push(entry.key().clone());
            }
        }
        for room in emptied {
            // A join may have raced the sweep; only drop still-empty rooms.
            self.rooms.remove_if(&room, |_, members| members.is_empty());
        }
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rooms
            .get(room)
            .map(|members| members.iter().map(|m| m.peer_id.clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}
