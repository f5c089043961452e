use futures_util::{SinkExt, StreamExt};
use matinee_proto::{ClientMessage, PlaybackEvent, PlaybackKind, ServerMessage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::call::SignalOutlet;
use crate::playback::PlaybackOutlet;
use crate::reactions::ReactionOutlet;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("relay connection closed")]
    Closed,
    #[error("the lobby never acknowledged the join")]
    JoinFailed,
}

/// Call-establishment notices delivered to the handshake machine.
#[derive(Debug, Clone)]
pub enum CallNotice {
    Incoming { from_peer: String, offer: Value },
    Accepted { answer: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Playback,
    Calls,
    Reactions,
    FileChanges,
}

/// Registered subscription lanes. Senders are pruned as soon as a send
/// fails, so a dropped receiver never accumulates messages.
#[derive(Default)]
struct Routes {
    next_id: AtomicU64,
    playback: Mutex<HashMap<u64, mpsc::UnboundedSender<PlaybackEvent>>>,
    calls: Mutex<HashMap<u64, mpsc::UnboundedSender<CallNotice>>>,
    reactions: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    file_changes: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
}

impl Routes {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn unregister(&self, lane: Lane, id: u64) {
        match lane {
            Lane::Playback => {
                self.playback.lock().unwrap().remove(&id);
            }
            Lane::Calls => {
                self.calls.lock().unwrap().remove(&id);
            }
            Lane::Reactions => {
                self.reactions.lock().unwrap().remove(&id);
            }
            Lane::FileChanges => {
                self.file_changes.lock().unwrap().remove(&id);
            }
        }
    }

    fn fan_playback(&self, event: PlaybackEvent) {
        self.playback
            .lock()
            .unwrap()
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn fan_call(&self, notice: CallNotice) {
        self.calls
            .lock()
            .unwrap()
            .retain(|_, tx| tx.send(notice.clone()).is_ok());
    }

    fn fan_reaction(&self, emoji: &str) {
        self.reactions
            .lock()
            .unwrap()
            .retain(|_, tx| tx.send(emoji.to_string()).is_ok());
    }

    fn fan_file_change(&self, file_name: &str) {
        self.file_changes
            .lock()
            .unwrap()
            .retain(|_, tx| tx.send(file_name.to_string()).is_ok());
    }
}

/// A typed view of the inbound message stream, scoped to its owner: the
/// lane is deregistered when the subscription is dropped.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    id: u64,
    lane: Lane,
    routes: Arc<Routes>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.routes.unregister(self.lane, self.id);
    }
}

/// The participant's explicitly-owned connection to the lobby.
///
/// Constructed once by the orchestrator and injected into the state
/// machines; nothing else opens sockets. `connect` resolves only after the
/// lobby has acknowledged the join, so the relay identity is always known.
pub struct RelayClient {
    peer_id: String,
    room: String,
    send_tx: mpsc::UnboundedSender<ClientMessage>,
    routes: Arc<Routes>,
    seq: AtomicU64,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RelayClient {
    pub async fn connect(url: &str, room: &str) -> Result<Arc<Self>, RelayError> {
        let endpoint = relay_endpoint(url)?;
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| RelayError::Connect(err.to_string()))?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let routes = Arc::new(Routes::default());
        let (joined_tx, joined_rx) = oneshot::channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                if let Ok(text) = serde_json::to_string(&message) {
                    if ws_write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        });

        let reader_routes = routes.clone();
        let reader = tokio::spawn(async move {
            let mut joined_slot = Some(joined_tx);
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(ServerMessage::Joined { peer_id, room }) => {
                                debug!(room = %room, peer = %peer_id, "join acknowledged");
                                if let Some(tx) = joined_slot.take() {
                                    let _ = tx.send(peer_id);
                                }
                            }
                            Ok(server_msg) => dispatch(&reader_routes, server_msg),
                            Err(err) => {
                                warn!(error = %err, "unparseable frame from the lobby")
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "relay websocket error");
                        break;
                    }
                }
            }
        });

        let heartbeat_tx = send_tx.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(ClientMessage::Ping).is_err() {
                    break;
                }
            }
        });

        send_tx
            .send(ClientMessage::Join {
                room: room.to_string(),
            })
            .map_err(|_| RelayError::Closed)?;

        let peer_id = tokio::time::timeout(JOIN_TIMEOUT, joined_rx)
            .await
            .map_err(|_| RelayError::JoinFailed)?
            .map_err(|_| RelayError::JoinFailed)?;

        Ok(Arc::new(Self {
            peer_id,
            room: room.to_string(),
            send_tx,
            routes,
            seq: AtomicU64::new(0),
            tasks: Mutex::new(vec![writer, reader, heartbeat]),
        }))
    }

    /// The relay identity the lobby assigned to this connection.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn subscribe_playback(&self) -> Subscription<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.routes.next_id();
        self.routes.playback.lock().unwrap().insert(id, tx);
        self.subscription(rx, id, Lane::Playback)
    }

    pub fn subscribe_calls(&self) -> Subscription<CallNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.routes.next_id();
        self.routes.calls.lock().unwrap().insert(id, tx);
        self.subscription(rx, id, Lane::Calls)
    }

    pub fn subscribe_reactions(&self) -> Subscription<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.routes.next_id();
        self.routes.reactions.lock().unwrap().insert(id, tx);
        self.subscription(rx, id, Lane::Reactions)
    }

    pub fn subscribe_file_changes(&self) -> Subscription<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.routes.next_id();
        self.routes.file_changes.lock().unwrap().insert(id, tx);
        self.subscription(rx, id, Lane::FileChanges)
    }

    fn subscription<T>(
        &self,
        rx: mpsc::UnboundedReceiver<T>,
        id: u64,
        lane: Lane,
    ) -> Subscription<T> {
        Subscription {
            rx,
            id,
            lane,
            routes: self.routes.clone(),
        }
    }

    /// Emit a playback transition stamped with this connection's next
    /// sequence number. Returns the number used.
    pub fn send_playback(&self, kind: PlaybackKind, position: f64) -> Result<u64, RelayError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(ClientMessage::playback(&self.room, kind, position, seq))?;
        Ok(seq)
    }

    pub fn send_call_intent(&self, offer: Value) -> Result<(), RelayError> {
        self.send(ClientMessage::CallIntent {
            room: self.room.clone(),
            offer,
        })
    }

    pub fn send_call_answer(&self, answer: Value) -> Result<(), RelayError> {
        self.send(ClientMessage::CallAnswer {
            room: self.room.clone(),
            answer,
        })
    }

    pub fn send_reaction(&self, emoji: &str) -> Result<(), RelayError> {
        self.send(ClientMessage::Reaction {
            room: self.room.clone(),
            emoji: emoji.to_string(),
        })
    }

    pub fn send_file_change(&self, file_name: &str) -> Result<(), RelayError> {
        self.send(ClientMessage::FileChange {
            room: self.room.clone(),
            file_name: file_name.to_string(),
        })
    }

    fn send(&self, message: ClientMessage) -> Result<(), RelayError> {
        self.send_tx.send(message).map_err(|_| RelayError::Closed)
    }

    /// Tear the connection down. The socket tasks stop immediately; any
    /// outstanding subscriptions simply run dry.
    pub fn close(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

fn relay_endpoint(base: &str) -> Result<Url, RelayError> {
    let mut url = Url::parse(base).map_err(|err| RelayError::Connect(err.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RelayError::Connect(format!(
                "unsupported url scheme '{other}'"
            )))
        }
    }
    url.set_path("/ws");
    Ok(url)
}

fn dispatch(routes: &Routes, message: ServerMessage) {
    if let Some(event) = message.as_playback() {
        routes.fan_playback(event);
        return;
    }
    match message {
        ServerMessage::IncomingCall { from_peer, offer } => {
            routes.fan_call(CallNotice::Incoming { from_peer, offer });
        }
        ServerMessage::CallAccepted { answer } => {
            routes.fan_call(CallNotice::Accepted { answer });
        }
        ServerMessage::ReceiveReaction { emoji } => routes.fan_reaction(&emoji),
        ServerMessage::ReceiveFileChange { file_name } => routes.fan_file_change(&file_name),
        ServerMessage::Error { message } => warn!(message = %message, "lobby reported an error"),
        ServerMessage::Pong => {}
        // Playback was handled above; a late Joined has nothing to do.
        _ => {}
    }
}

impl PlaybackOutlet for RelayClient {
    fn emit(&self, kind: PlaybackKind, position: f64) {
        if self.send_playback(kind, position).is_err() {
            warn!("dropping playback event: relay connection closed");
        }
    }
}

impl SignalOutlet for RelayClient {
    fn send_offer(&self, offer: Value) {
        if self.send_call_intent(offer).is_err() {
            warn!("dropping call offer: relay connection closed");
        }
    }

    fn send_answer(&self, answer: Value) {
        if self.send_call_answer(answer).is_err() {
            warn!("dropping call answer: relay connection closed");
        }
    }
}

impl ReactionOutlet for RelayClient {
    fn emit(&self, emoji: &str) {
        if self.send_reaction(emoji).is_err() {
            warn!("dropping reaction: relay connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matinee_proto::PlaybackKind;
    use serde_json::json;

    fn playback_subscription(routes: &Arc<Routes>) -> Subscription<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = routes.next_id();
        routes.playback.lock().unwrap().insert(id, tx);
        Subscription {
            rx,
            id,
            lane: Lane::Playback,
            routes: routes.clone(),
        }
    }

    #[test]
    fn dispatch_routes_playback_to_playback_lanes() {
        let routes = Arc::new(Routes::default());
        let mut sub = playback_subscription(&routes);

        dispatch(
            &routes,
            ServerMessage::ReceivePlay {
                origin: "peer-a".into(),
                position: 10.0,
                seq: 1,
            },
        );

        let event = sub.rx.try_recv().expect("event delivered");
        assert_eq!(event.kind, PlaybackKind::Play);
        assert_eq!(event.origin, "peer-a");
    }

    #[test]
    fn dispatch_routes_call_notices_to_call_lanes() {
        let routes = Arc::new(Routes::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = routes.next_id();
        routes.calls.lock().unwrap().insert(id, tx);

        dispatch(
            &routes,
            ServerMessage::IncomingCall {
                from_peer: "peer-a".into(),
                offer: json!({"sdp": "o1"}),
            },
        );

        match rx.try_recv().expect("notice delivered") {
            CallNotice::Incoming { from_peer, .. } => assert_eq!(from_peer, "peer-a"),
            other => panic!("unexpected notice: {other:?}"),
        }
    }

    #[test]
    fn dropping_a_subscription_deregisters_its_lane() {
        let routes = Arc::new(Routes::default());
        let sub = playback_subscription(&routes);
        assert_eq!(routes.playback.lock().unwrap().len(), 1);

        drop(sub);
        assert!(routes.playback.lock().unwrap().is_empty());
    }

    #[test]
    fn fan_out_prunes_lanes_with_dropped_receivers() {
        let routes = Arc::new(Routes::default());
        let (tx, rx) = mpsc::unbounded_channel::<PlaybackEvent>();
        let id = routes.next_id();
        routes.playback.lock().unwrap().insert(id, tx);
        drop(rx);

        routes.fan_playback(PlaybackEvent {
            kind: PlaybackKind::Play,
            position: 0.0,
            origin: "peer-a".into(),
            seq: 1,
        });

        assert!(routes.playback.lock().unwrap().is_empty());
    }

    #[test]
    fn endpoints_require_a_websocket_scheme() {
        assert!(relay_endpoint("ws://localhost:4400").is_ok());
        assert!(relay_endpoint("wss://lobby.example").is_ok());
        assert!(relay_endpoint("http://localhost:4400").is_err());
        assert!(relay_endpoint("not a url").is_err());
    }
}
