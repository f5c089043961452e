//! Wire protocol shared between the matinee client and the lobby relay.
//! Keeping this in a dedicated crate lets the server stay a pure forwarder
//! while both sides agree on one set of message shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Generate a relay identity for a freshly connected peer.
pub fn generate_peer_id() -> String {
    Uuid::new_v4().to_string()
}

/// The three player transitions that are kept in lockstep across the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackKind {
    Play,
    Pause,
    Seek,
}

/// A playback transition as seen by a receiver: what happened, where in the
/// media file, who caused it, and that sender's running sequence number.
///
/// `origin` and `seq` exist so receivers can drop their own events and
/// duplicates without depending on timing windows.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackEvent {
    pub kind: PlaybackKind,
    /// Seconds from the start of the media file.
    pub position: f64,
    pub origin: String,
    pub seq: u64,
}

/// Messages sent from a participant to the lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room; the lobby answers with `joined`.
    Join { room: String },
    Play { room: String, position: f64, seq: u64 },
    Pause { room: String, position: f64, seq: u64 },
    Seek { room: String, position: f64, seq: u64 },
    /// Start a call: the opaque offer is relayed to the rest of the room.
    CallIntent { room: String, offer: Value },
    /// Answer a pending call; relayed room-wide as `call_accepted`.
    CallAnswer { room: String, answer: Value },
    Reaction { room: String, emoji: String },
    /// Announce which media file this participant loaded.
    FileChange { room: String, file_name: String },
    /// Heartbeat to keep the connection alive.
    Ping,
}

impl ClientMessage {
    pub fn playback(room: &str, kind: PlaybackKind, position: f64, seq: u64) -> Self {
        let room = room.to_string();
        match kind {
            PlaybackKind::Play => ClientMessage::Play { room, position, seq },
            PlaybackKind::Pause => ClientMessage::Pause { room, position, seq },
            PlaybackKind::Seek => ClientMessage::Seek { room, position, seq },
        }
    }
}

/// Messages sent from the lobby to a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join acknowledgment carrying the relay identity assigned to this
    /// connection. Everything the peer later emits is stamped with it.
    Joined { room: String, peer_id: String },
    ReceivePlay { origin: String, position: f64, seq: u64 },
    ReceivePause { origin: String, position: f64, seq: u64 },
    ReceiveSeek { origin: String, position: f64, seq: u64 },
    /// A peer in the room wants to start a call.
    IncomingCall { from_peer: String, offer: Value },
    /// A peer accepted a pending call. Broadcast room-wide; receivers that
    /// never offered ignore it.
    CallAccepted { answer: Value },
    ReceiveReaction { emoji: String },
    ReceiveFileChange { file_name: String },
    Pong,
    /// The lobby could not make sense of an inbound frame.
    Error { message: String },
}

impl ServerMessage {
    /// Relay form of a client playback message, stamped with the sender's
    /// relay identity.
    pub fn playback_from(origin: &str, kind: PlaybackKind, position: f64, seq: u64) -> Self {
        let origin = origin.to_string();
        match kind {
            PlaybackKind::Play => ServerMessage::ReceivePlay { origin, position, seq },
            PlaybackKind::Pause => ServerMessage::ReceivePause { origin, position, seq },
            PlaybackKind::Seek => ServerMessage::ReceiveSeek { origin, position, seq },
        }
    }

    /// View a relayed playback message as a `PlaybackEvent`.
    pub fn as_playback(&self) -> Option<PlaybackEvent> {
        let (kind, origin, position, seq) = match self {
            ServerMessage::ReceivePlay { origin, position, seq } => {
                (PlaybackKind::Play, origin, position, seq)
            }
            ServerMessage::ReceivePause { origin, position, seq } => {
                (PlaybackKind::Pause, origin, position, seq)
            }
            ServerMessage::ReceiveSeek { origin, position, seq } => {
                (PlaybackKind::Seek, origin, position, seq)
            }
            _ => return None,
        };
        Some(PlaybackEvent {
            kind,
            position: *position,
            origin: origin.clone(),
            seq: *seq,
        })
    }
}
