use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use matinee_proto::{ClientMessage, ServerMessage};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "matinee-lobby")]
#[command(about = "Matinee lobby relay server and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a room over a real WebSocket and report what the relay answers
    Probe {
        /// Lobby URL (e.g. ws://localhost:4400)
        #[arg(short, long, default_value = "ws://localhost:4400")]
        url: String,

        /// Room to join
        #[arg(short, long)]
        room: String,
    },
}

/// Connect to a running lobby, join `room`, and print the assigned relay
/// identity. Useful for checking a deployment end to end.
pub async fn run_probe(url: String, room: String) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    let (ws_stream, _) = timeout(Duration::from_secs(5), connect_async(&ws_url))
        .await
        .context("connect timed out")?
        .context("websocket connect failed")?;
    let (mut write, mut read) = ws_stream.split();

    let join = serde_json::to_string(&ClientMessage::Join { room: room.clone() })?;
    write.send(Message::Text(join)).await?;

    let deadline = Duration::from_secs(5);
    loop {
        let msg = timeout(deadline, read.next())
            .await
            .context("no join acknowledgment from the lobby")?
            .ok_or_else(|| anyhow!("connection closed before join was acknowledged"))??;

        match msg {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::Joined { room, peer_id } => {
                    println!("joined room '{room}' as {peer_id}");
                    return Ok(());
                }
                ServerMessage::Error { message } => {
                    return Err(anyhow!("lobby rejected the probe: {message}"));
                }
                other => debug!("skipping {other:?} while waiting for join ack"),
            },
            Message::Close(_) => {
                return Err(anyhow!("connection closed before join was acknowledged"));
            }
            _ => {}
        }
    }
}
