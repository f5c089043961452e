mod link;
mod rtc;

pub use link::{CallConnection, CallError, CallRole, PeerConnector, PeerLink, RemoteMedia};
pub use rtc::{LocalMediaProvider, RtcConfig, RtcConnector, StaticMedia};

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outbound half of the handshake: hand a blob to the signaling relay.
pub trait SignalOutlet: Send + Sync {
    fn send_offer(&self, offer: Value);
    fn send_answer(&self, answer: Value);
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long a pending offer may wait for an answer before the attempt
    /// is abandoned.
    pub answer_timeout: Duration,
    /// Bound on local media acquisition plus link construction.
    pub media_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            answer_timeout: Duration::from_secs(30),
            media_timeout: Duration::from_secs(30),
        }
    }
}

/// Where the handshake currently stands. Transitions are monotonic;
/// `Ended` is terminal and a fresh machine serves any later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Calling,
    ReceivingCall,
    Connected,
    Ended,
}

enum State {
    Idle,
    Calling {
        link: Box<dyn PeerLink>,
        offered_at: Instant,
    },
    ReceivingCall {
        from_peer: String,
        offer: Value,
    },
    Connected {
        link: Box<dyn PeerLink>,
    },
    Ended,
}

/// Drives one call attempt end to end. The peer-connection handle lives
/// inside the state variant that owns it, so a replacement can only be
/// installed once the previous one has been consumed and closed.
pub struct CallMachine {
    state: State,
    connector: Arc<dyn PeerConnector>,
    outlet: Arc<dyn SignalOutlet>,
    config: CallConfig,
}

impl CallMachine {
    pub fn new(connector: Arc<dyn PeerConnector>, outlet: Arc<dyn SignalOutlet>) -> Self {
        Self::with_config(connector, outlet, CallConfig::default())
    }

    pub fn with_config(
        connector: Arc<dyn PeerConnector>,
        outlet: Arc<dyn SignalOutlet>,
        config: CallConfig,
    ) -> Self {
        Self {
            state: State::Idle,
            connector,
            outlet,
            config,
        }
    }

    pub fn phase(&self) -> CallPhase {
        match self.state {
            State::Idle => CallPhase::Idle,
            State::Calling { .. } => CallPhase::Calling,
            State::ReceivingCall { .. } => CallPhase::ReceivingCall,
            State::Connected { .. } => CallPhase::Connected,
            State::Ended => CallPhase::Ended,
        }
    }

    /// Start a call: acquire local media, build the initiator link, emit
    /// the offer, enter `Calling`. Any failure leaves the machine `Idle`.
    pub async fn initiate(&mut self) -> Result<mpsc::UnboundedReceiver<RemoteMedia>, CallError> {
        if !matches!(self.state, State::Idle) {
            return Err(CallError::BadState("call machine is not idle"));
        }

        let CallConnection { link, remote_media } = self.connect(CallRole::Initiator).await?;
        let offer = match link.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                link.close().await;
                return Err(err);
            }
        };

        self.outlet.send_offer(offer);
        self.state = State::Calling {
            link,
            offered_at: Instant::now(),
        };
        info!("call offered");
        Ok(remote_media)
    }

    /// An incoming-call notice from the relay. Only an idle machine takes
    /// it; a second intent while busy is dropped.
    pub fn on_incoming(&mut self, from_peer: String, offer: Value) {
        match self.state {
            State::Idle => {
                info!(caller = %from_peer, "incoming call");
                self.state = State::ReceivingCall { from_peer, offer };
            }
            _ => debug!(caller = %from_peer, "ignoring call intent while busy"),
        }
    }

    /// Answer the stored offer and connect. Media denial returns the
    /// machine to `Idle`.
    pub async fn accept(&mut self) -> Result<mpsc::UnboundedReceiver<RemoteMedia>, CallError> {
        let (from_peer, offer) = match std::mem::replace(&mut self.state, State::Idle) {
            State::ReceivingCall { from_peer, offer } => (from_peer, offer),
            other => {
                self.state = other;
                return Err(CallError::BadState("no pending call to accept"));
            }
        };

        let CallConnection { link, remote_media } = self.connect(CallRole::Responder).await?;
        let answer = match link.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(err) => {
                link.close().await;
                return Err(err);
            }
        };

        self.outlet.send_answer(answer);
        self.state = State::Connected { link };
        info!(caller = %from_peer, "call accepted");
        Ok(remote_media)
    }

    /// A call-accepted notice. Honored only in `Calling`; anything else is
    /// a stray room-wide broadcast and is dropped by the guard.
    pub async fn on_accepted(&mut self, answer: Value) -> Result<(), CallError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Calling { link, .. } => match link.apply_answer(answer).await {
                Ok(()) => {
                    self.state = State::Connected { link };
                    info!("call connected");
                    Ok(())
                }
                Err(err) => {
                    link.close().await;
                    self.state = State::Ended;
                    Err(err)
                }
            },
            other => {
                self.state = other;
                debug!("ignoring call-accepted outside of a pending offer");
                Ok(())
            }
        }
    }

    /// Expire a `Calling` attempt whose answer never arrived. Returns true
    /// when the attempt was abandoned.
    pub async fn check_answer_timeout(&mut self, now: Instant) -> bool {
        let expired = matches!(
            &self.state,
            State::Calling { offered_at, .. }
                if now.duration_since(*offered_at) >= self.config.answer_timeout
        );
        if expired {
            if let State::Calling { link, .. } = std::mem::replace(&mut self.state, State::Ended) {
                link.close().await;
            }
            warn!("call attempt expired with no answer");
        }
        expired
    }

    /// Hang up a connected call, closing the link and releasing its media.
    pub async fn end(&mut self) {
        match std::mem::replace(&mut self.state, State::Ended) {
            State::Connected { link } => {
                link.close().await;
                info!("call ended");
            }
            other => self.state = other,
        }
    }

    async fn connect(&self, role: CallRole) -> Result<CallConnection, CallError> {
        timeout(self.config.media_timeout, self.connector.connect(role))
            .await
            .map_err(|_| CallError::MediaDenied("media acquisition timed out".into()))?
    }
}
