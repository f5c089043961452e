use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

use super::link::{CallConnection, CallError, CallRole, PeerConnector, PeerLink, RemoteMedia};

/// Provides the local capture tracks for a call. Device capture itself is
/// outside this crate; embedders supply tracks, tests supply none.
#[async_trait]
pub trait LocalMediaProvider: Send + Sync {
    async fn acquire(&self) -> Result<Vec<Arc<dyn TrackLocal + Send + Sync>>, CallError>;
}

/// Vends a fixed set of pre-built tracks; with none, the participant is
/// receive-only.
pub struct StaticMedia {
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl StaticMedia {
    pub fn new(tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>) -> Self {
        Self { tracks }
    }

    pub fn none() -> Self {
        Self { tracks: Vec::new() }
    }
}

#[async_trait]
impl LocalMediaProvider for StaticMedia {
    async fn acquire(&self) -> Result<Vec<Arc<dyn TrackLocal + Send + Sync>>, CallError> {
        Ok(self.tracks.clone())
    }
}

#[derive(Debug, Clone)]
pub struct RtcConfig {
    pub stun_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// Peer-connection factory backed by the `webrtc` crate.
pub struct RtcConnector {
    config: RtcConfig,
    media: Arc<dyn LocalMediaProvider>,
}

impl RtcConnector {
    pub fn new(config: RtcConfig, media: Arc<dyn LocalMediaProvider>) -> Self {
        Self { config, media }
    }

    fn build_api() -> Result<API, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(to_negotiation)?;

        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(to_negotiation)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(&self, _role: CallRole) -> Result<CallConnection, CallError> {
        let tracks = self.media.acquire().await?;

        let api = Self::build_api()?;
        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(to_negotiation)?,
        );

        if tracks.is_empty() {
            // Without local tracks the description would carry no media
            // sections; advertise receive-only audio and video instead.
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                pc.add_transceiver_from_kind(kind, None)
                    .await
                    .map_err(to_negotiation)?;
            }
        } else {
            for track in tracks {
                pc.add_track(track).await.map_err(to_negotiation)?;
            }
        }

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let media_tx = media_tx.clone();
            Box::pin(async move {
                debug!(kind = %track.kind(), "remote track arrived");
                let _ = media_tx.send(RemoteMedia {
                    kind: track.kind().to_string(),
                    track_id: track.id(),
                });
            })
        }));

        Ok(CallConnection {
            link: Box::new(RtcLink { pc }),
            remote_media: media_rx,
        })
    }
}

struct RtcLink {
    pc: Arc<RTCPeerConnection>,
}

impl RtcLink {
    /// Wait for ICE gathering to finish so the local description is one
    /// complete blob; candidates are never trickled.
    async fn complete_local_description(&self) -> Result<Value, CallError> {
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        let _ = gather_complete.recv().await;
        let desc = self.pc.local_description().await.ok_or_else(|| {
            CallError::Negotiation("no local description after gathering".into())
        })?;
        serde_json::to_value(&desc).map_err(to_negotiation)
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn create_offer(&self) -> Result<Value, CallError> {
        let offer = self.pc.create_offer(None).await.map_err(to_negotiation)?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(to_negotiation)?;
        self.complete_local_description().await
    }

    async fn accept_offer(&self, offer: Value) -> Result<Value, CallError> {
        let offer = description_from_value(&offer)?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(to_negotiation)?;
        let answer = self.pc.create_answer(None).await.map_err(to_negotiation)?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(to_negotiation)?;
        self.complete_local_description().await
    }

    async fn apply_answer(&self, answer: Value) -> Result<(), CallError> {
        let answer = description_from_value(&answer)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(to_negotiation)
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(error = %err, "peer connection close failed");
        }
    }
}

/// Rebuild an `RTCSessionDescription` from its relayed JSON form.
fn description_from_value(value: &Value) -> Result<RTCSessionDescription, CallError> {
    let sdp = value["sdp"]
        .as_str()
        .ok_or_else(|| CallError::Negotiation("description blob has no sdp".into()))?
        .to_string();
    match value["type"].as_str() {
        Some("offer") => RTCSessionDescription::offer(sdp).map_err(to_negotiation),
        Some("answer") => RTCSessionDescription::answer(sdp).map_err(to_negotiation),
        other => Err(CallError::Negotiation(format!(
            "unsupported description type {other:?}"
        ))),
    }
}

fn to_negotiation(err: impl std::fmt::Display) -> CallError {
    CallError::Negotiation(err.to_string())
}
