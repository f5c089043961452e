use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum CallError {
    /// Local media devices were denied or unavailable. The handshake
    /// machine stays in `Idle` when this surfaces.
    #[error("local media unavailable: {0}")]
    MediaDenied(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("call is not in a state that allows this operation: {0}")]
    BadState(&'static str),
}

/// Which side of the handshake this connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Initiator,
    Responder,
}

/// Announcement that a remote media track became available. Routing the
/// actual samples to a sink is the embedder's concern, not the machine's.
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    pub kind: String,
    pub track_id: String,
}

/// One peer-to-peer connection attempt. Descriptions are opaque blobs
/// produced and consumed only by the underlying engine; nothing in this
/// crate looks inside them.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Produce the complete local offer description. Single-shot: the blob
    /// already carries every connectivity candidate.
    async fn create_offer(&self) -> Result<Value, CallError>;
    /// Apply a remote offer and produce the complete local answer.
    async fn accept_offer(&self, offer: Value) -> Result<Value, CallError>;
    /// Apply the remote answer on an initiator-side link.
    async fn apply_answer(&self, answer: Value) -> Result<(), CallError>;
    /// Close the connection, releasing the media it holds.
    async fn close(&self);
}

/// Everything one call attempt needs: the negotiation handle plus the feed
/// announcing remote media as it arrives.
pub struct CallConnection {
    pub link: Box<dyn PeerLink>,
    pub remote_media: mpsc::UnboundedReceiver<RemoteMedia>,
}

/// Builds peer connections, acquiring local media in the process.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, role: CallRole) -> Result<CallConnection, CallError>;
}
