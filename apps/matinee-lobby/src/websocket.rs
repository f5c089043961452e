use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use matinee_proto::{generate_peer_id, ClientMessage, PlaybackKind, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::rooms::{PeerHandle, RoomRegistry};

/// WebSocket upgrade handler for the relay endpoint.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(registry): State<RoomRegistry>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: RoomRegistry) {
    let peer_id = generate_peer_id();
    let (mut sender, mut receiver) = socket.split();

    // Per-connection outbound queue, pumped into the socket by its own task
    // so relays from other connections never block on this socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let pump_peer = peer_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        debug!(peer = %pump_peer, "outbound pump ended");
    });

    debug!(peer = %peer_id, "websocket connected");

    while let Some(msg_result) = receiver.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(err) => {
                error!(peer = %peer_id, error = %err, "websocket error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(client_msg, &peer_id, &registry, &tx),
                Err(err) => {
                    warn!(peer = %peer_id, error = %err, "unparseable client message");
                    let _ = tx.send(ServerMessage::Error {
                        message: format!("invalid message: {err}"),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Membership ends with the connection. Remaining members are not told;
    // their machines keep whatever state they had.
    registry.remove_everywhere(&peer_id);
    debug!(peer = %peer_id, "websocket disconnected");
}

/// Dispatch one inbound message. The relay is stateless: everything except
/// `join` and `ping` is stamped with the sender identity and fanned out to
/// the rest of the sender's room.
fn handle_client_message(
    message: ClientMessage,
    peer_id: &str,
    registry: &RoomRegistry,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match message {
        ClientMessage::Join { room } => {
            registry.join(
                &room,
                PeerHandle {
                    peer_id: peer_id.to_string(),
                    tx: tx.clone(),
                },
            );
            let _ = tx.send(ServerMessage::Joined {
                room,
                peer_id: peer_id.to_string(),
            });
        }
        ClientMessage::Play { room, position, seq } => {
            registry.broadcast_except(
                &room,
                peer_id,
                ServerMessage::playback_from(peer_id, PlaybackKind::Play, position, seq),
            );
        }
        ClientMessage::Pause { room, position, seq } => {
            registry.broadcast_except(
                &room,
                peer_id,
                ServerMessage::playback_from(peer_id, PlaybackKind::Pause, position, seq),
            );
        }
        ClientMessage::Seek { room, position, seq } => {
            registry.broadcast_except(
                &room,
                peer_id,
                ServerMessage::playback_from(peer_id, PlaybackKind::Seek, position, seq),
            );
        }
        ClientMessage::CallIntent { room, offer } => {
            registry.broadcast_except(
                &room,
                peer_id,
                ServerMessage::IncomingCall {
                    from_peer: peer_id.to_string(),
                    offer,
                },
            );
        }
        ClientMessage::CallAnswer { room, answer } => {
            registry.broadcast_except(&room, peer_id, ServerMessage::CallAccepted { answer });
        }
        ClientMessage::Reaction { room, emoji } => {
            registry.broadcast_except(&room, peer_id, ServerMessage::ReceiveReaction { emoji });
        }
        ClientMessage::FileChange { room, file_name } => {
            registry.broadcast_except(
                &room,
                peer_id,
                ServerMessage::ReceiveFileChange { file_name },
            );
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}
