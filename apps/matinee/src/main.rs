use anyhow::Result;
use clap::Parser;
use matinee::call::{CallMachine, CallPhase, RemoteMedia, RtcConfig, RtcConnector, StaticMedia};
use matinee::playback::PlaybackSync;
use matinee::player::{MediaPlayer, SimPlayer};
use matinee::reactions::ReactionBoard;
use matinee::session::{CallNotice, RelayClient};
use matinee_proto::PlaybackKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "matinee")]
#[command(about = "Co-watch a local media file in lockstep with a partner")]
struct Args {
    /// Lobby URL
    #[arg(long, default_value = "ws://localhost:4400")]
    server: String,

    /// Room to join
    #[arg(long)]
    room: String,

    /// Media file announced to the partner
    #[arg(long)]
    media: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let relay = RelayClient::connect(&args.server, &args.room).await?;
    println!("joined room '{}' as {}", args.room, relay.peer_id());

    if let Some(media) = &args.media {
        relay.send_file_change(media)?;
        println!("announced '{media}' to the room");
    }

    let mut playback_rx = relay.subscribe_playback();
    let mut calls_rx = relay.subscribe_calls();
    let mut reactions_rx = relay.subscribe_reactions();
    let mut files_rx = relay.subscribe_file_changes();

    let mut sync = PlaybackSync::new(SimPlayer::new(), relay.clone(), relay.peer_id().to_string());
    let connector = Arc::new(RtcConnector::new(
        RtcConfig::default(),
        Arc::new(StaticMedia::none()),
    ));
    let mut call = CallMachine::new(connector, relay.clone());
    let mut board = ReactionBoard::new(relay.clone());
    let mut remote_media: Option<mpsc::UnboundedReceiver<RemoteMedia>> = None;

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(line.trim(), &mut sync, &mut call, &mut board, &mut remote_media).await {
                    break;
                }
            }
            Some(event) = playback_rx.recv() => {
                sync.apply_remote(&event);
                println!("partner: {:?} at {:.1}s", event.kind, event.position);
            }
            Some(notice) = calls_rx.recv() => match notice {
                CallNotice::Incoming { from_peer, offer } => {
                    call.on_incoming(from_peer.clone(), offer);
                    println!("incoming call from {from_peer} — type 'accept' to answer");
                }
                CallNotice::Accepted { answer } => {
                    match call.on_accepted(answer).await {
                        Ok(()) if call.phase() == CallPhase::Connected => {
                            println!("call connected");
                        }
                        Ok(()) => {}
                        Err(err) => eprintln!("call failed: {err}"),
                    }
                }
            },
            Some(emoji) = reactions_rx.recv() => {
                board.apply_remote(&emoji, Instant::now());
                println!("partner reacted {emoji}");
            }
            Some(file_name) = files_rx.recv() => {
                println!("partner loaded '{file_name}'");
            }
            Some(media) = recv_remote_media(&mut remote_media) => {
                println!("remote {} track available ({})", media.kind, media.track_id);
            }
            _ = ticker.tick() => {
                board.prune(Instant::now());
                if call.check_answer_timeout(Instant::now()).await {
                    eprintln!("call attempt timed out");
                }
            }
        }
    }

    relay.close();
    Ok(())
}

async fn recv_remote_media(
    slot: &mut Option<mpsc::UnboundedReceiver<RemoteMedia>>,
) -> Option<RemoteMedia> {
    match slot {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_command(
    line: &str,
    sync: &mut PlaybackSync<SimPlayer>,
    call: &mut CallMachine,
    board: &mut ReactionBoard,
    remote_media: &mut Option<mpsc::UnboundedReceiver<RemoteMedia>>,
) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("play") => {
            sync.player_mut().play();
            sync.observe_local(PlaybackKind::Play);
        }
        Some("pause") => {
            sync.player_mut().pause();
            sync.observe_local(PlaybackKind::Pause);
        }
        Some("seek") => match parts.next().and_then(|s| s.parse::<f64>().ok()) {
            Some(seconds) => {
                sync.player_mut().set_position(seconds);
                sync.observe_local(PlaybackKind::Seek);
            }
            None => eprintln!("usage: seek <seconds>"),
        },
        Some("call") => match call.initiate().await {
            Ok(rx) => {
                *remote_media = Some(rx);
                println!("calling…");
            }
            Err(err) => eprintln!("cannot call: {err}"),
        },
        Some("accept") => match call.accept().await {
            Ok(rx) => {
                *remote_media = Some(rx);
                println!("call connected");
            }
            Err(err) => eprintln!("cannot accept: {err}"),
        },
        Some("end") => {
            call.end().await;
            *remote_media = None;
        }
        Some("react") => match parts.next() {
            Some(emoji) => board.send(emoji, Instant::now()),
            None => eprintln!("usage: react <emoji>"),
        },
        Some("status") => {
            let state = if sync.player().is_playing() {
                "playing"
            } else {
                "paused"
            };
            println!(
                "{state} at {:.1}s, call {:?}, {} reactions on screen",
                sync.player().position(),
                call.phase(),
                board.visible().len()
            );
        }
        Some("quit") | Some("exit") => return false,
        Some("help") => print_help(),
        Some(other) => eprintln!("unknown command '{other}' — try 'help'"),
        None => {}
    }
    true
}

fn print_help() {
    println!("commands: play | pause | seek <s> | call | accept | end | react <emoji> | status | quit");
}
