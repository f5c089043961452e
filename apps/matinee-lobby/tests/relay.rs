use futures_util::{SinkExt, StreamExt};
use matinee_lobby::{build_router, rooms::RoomRegistry};
use matinee_proto::{ClientMessage, ServerMessage};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_lobby() -> (SocketAddr, RoomRegistry) {
    let registry = RoomRegistry::new();
    let app = build_router(registry.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve lobby");
    });
    (addr, registry)
}

struct WireClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WireClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (socket, _) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("connect to lobby");
        Self { socket }
    }

    async fn send(&mut self, msg: &ClientMessage) {
        let text = serde_json::to_string(msg).expect("serialize client message");
        self.socket
            .send(Message::Text(text))
            .await
            .expect("send frame");
    }

    async fn recv(&mut self) -> ServerMessage {
        loop {
            let msg = timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .expect("receive timed out")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).expect("parse server message");
            }
        }
    }

    /// Assert that nothing arrives within a short grace window.
    async fn expect_silence(&mut self) {
        if let Ok(frame) = timeout(Duration::from_millis(200), self.socket.next()).await {
            panic!("expected silence, got {frame:?}");
        }
    }

    async fn join(&mut self, room: &str) -> String {
        self.send(&ClientMessage::Join {
            room: room.to_string(),
        })
        .await;
        match self.recv().await {
            ServerMessage::Joined { peer_id, .. } => peer_id,
            other => panic!("expected join ack, got {other:?}"),
        }
    }

    async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

#[tokio::test]
async fn two_peers_share_a_room_and_other_rooms_stay_empty() {
    let (addr, registry) = start_lobby().await;
    let mut a = WireClient::connect(addr).await;
    let mut b = WireClient::connect(addr).await;

    let id_a = a.join("movie-1").await;
    let id_b = b.join("movie-1").await;

    let mut expected = vec![id_a, id_b];
    expected.sort();
    assert_eq!(registry.members("movie-1"), expected);
    assert_eq!(registry.member_count("movie-2"), 0);
}

#[tokio::test]
async fn playback_relays_to_the_room_but_never_back_to_the_sender() {
    let (addr, _registry) = start_lobby().await;
    let mut a = WireClient::connect(addr).await;
    let mut b = WireClient::connect(addr).await;

    let id_a = a.join("movie-1").await;
    b.join("movie-1").await;

    a.send(&ClientMessage::Play {
        room: "movie-1".into(),
        position: 10.0,
        seq: 1,
    })
    .await;

    match b.recv().await {
        ServerMessage::ReceivePlay {
            origin,
            position,
            seq,
        } => {
            assert_eq!(origin, id_a);
            assert_eq!(position, 10.0);
            assert_eq!(seq, 1);
        }
        other => panic!("expected receive_play, got {other:?}"),
    }

    a.expect_silence().await;
}

#[tokio::test]
async fn seek_relays_the_target_position() {
    let (addr, _registry) = start_lobby().await;
    let mut a = WireClient::connect(addr).await;
    let mut b = WireClient::connect(addr).await;

    a.join("movie-1").await;
    b.join("movie-1").await;

    a.send(&ClientMessage::Seek {
        room: "movie-1".into(),
        position: 42.3,
        seq: 2,
    })
    .await;

    match b.recv().await {
        ServerMessage::ReceiveSeek { position, .. } => assert_eq!(position, 42.3),
        other => panic!("expected receive_seek, got {other:?}"),
    }
}

#[tokio::test]
async fn signaling_relay_preserves_sender_identity_on_offers() {
    let (addr, _registry) = start_lobby().await;
    let mut a = WireClient::connect(addr).await;
    let mut b = WireClient::connect(addr).await;

    let id_a = a.join("movie-1").await;
    b.join("movie-1").await;

    let offer = json!({"sdp_type": "offer", "sdp": "v=0 o1"});
    a.send(&ClientMessage::CallIntent {
        room: "movie-1".into(),
        offer: offer.clone(),
    })
    .await;

    match b.recv().await {
        ServerMessage::IncomingCall {
            from_peer,
            offer: relayed,
        } => {
            assert_eq!(from_peer, id_a);
            assert_eq!(relayed, offer);
        }
        other => panic!("expected incoming_call, got {other:?}"),
    }

    let answer = json!({"sdp_type": "answer", "sdp": "v=0 r1"});
    b.send(&ClientMessage::CallAnswer {
        room: "movie-1".into(),
        answer: answer.clone(),
    })
    .await;

    match a.recv().await {
        ServerMessage::CallAccepted { answer: relayed } => assert_eq!(relayed, answer),
        other => panic!("expected call_accepted, got {other:?}"),
    }
}

#[tokio::test]
async fn reactions_and_file_changes_fan_out() {
    let (addr, _registry) = start_lobby().await;
    let mut a = WireClient::connect(addr).await;
    let mut b = WireClient::connect(addr).await;

    a.join("movie-1").await;
    b.join("movie-1").await;

    a.send(&ClientMessage::Reaction {
        room: "movie-1".into(),
        emoji: "🎉".into(),
    })
    .await;
    match b.recv().await {
        ServerMessage::ReceiveReaction { emoji } => assert_eq!(emoji, "🎉"),
        other => panic!("expected receive_reaction, got {other:?}"),
    }

    b.send(&ClientMessage::FileChange {
        room: "movie-1".into(),
        file_name: "movie-night.mkv".into(),
    })
    .await;
    match a.recv().await {
        ServerMessage::ReceiveFileChange { file_name } => {
            assert_eq!(file_name, "movie-night.mkv")
        }
        other => panic!("expected receive_file_change, got {other:?}"),
    }
}

#[tokio::test]
async fn relay_to_a_room_the_sender_never_joined_is_silent() {
    let (addr, _registry) = start_lobby().await;
    let mut a = WireClient::connect(addr).await;
    let mut b = WireClient::connect(addr).await;

    a.join("movie-1").await;
    b.join("movie-1").await;

    a.send(&ClientMessage::Play {
        room: "movie-2".into(),
        position: 0.0,
        seq: 1,
    })
    .await;
    b.expect_silence().await;

    // The sender's connection is still healthy.
    a.send(&ClientMessage::Ping).await;
    match a.recv().await {
        ServerMessage::Pong => {}
        other => panic!("expected pong, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_prunes_membership_without_notifying_the_room() {
    let (addr, registry) = start_lobby().await;
    let a = {
        let mut a = WireClient::connect(addr).await;
        a.join("movie-1").await;
        a
    };
    let mut b = WireClient::connect(addr).await;
    b.join("movie-1").await;
    assert_eq!(registry.member_count("movie-1"), 2);

    a.close().await;

    let deadline = Instant::now() + RECV_TIMEOUT;
    while registry.member_count("movie-1") != 1 {
        assert!(Instant::now() < deadline, "membership never pruned");
        sleep(Duration::from_millis(20)).await;
    }

    // No peer-leave notice reaches the remaining member.
    b.expect_silence().await;
}

#[tokio::test]
async fn malformed_frames_get_an_error_reply() {
    let (addr, _registry) = start_lobby().await;
    let mut a = WireClient::connect(addr).await;

    a.socket
        .send(Message::Text("not json".into()))
        .await
        .expect("send frame");

    match a.recv().await {
        ServerMessage::Error { message } => assert!(message.contains("invalid message")),
        other => panic!("expected error reply, got {other:?}"),
    }
}
