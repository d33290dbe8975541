use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Negotiation payload carried inside `signal` envelopes.
///
/// The relay never parses this; only the two session endpoints need to
/// agree on it, which is why it lives here and not in the wire crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    Offer { token: String },
    Answer { token: String },
    Candidate { candidate: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Negotiation(String),
}

/// Completion events from the capability layer, delivered on the owning
/// session's serial queue.
#[derive(Debug)]
pub enum TransportEvent {
    /// A locally discovered connectivity option to forward to the remote
    /// peer. May fire before the remote side has answered.
    LocalCandidate(String),
    /// The direct channel is open for `send_bytes`.
    Open,
    /// One frame received over the direct channel.
    Data(Vec<u8>),
    /// Orderly shutdown of the direct channel.
    Closed,
    /// Unrecoverable transport failure; the session moves to Failed.
    Failed(String),
}

/// Opaque direct-transport capability: offer/answer/candidate negotiation
/// plus a byte channel once the link is up.
#[async_trait]
pub trait PeerTransport: Send {
    async fn create_offer(&mut self) -> Result<SignalPayload, TransportError>;
    async fn create_answer(&mut self) -> Result<SignalPayload, TransportError>;
    async fn apply_remote_description(
        &mut self,
        description: SignalPayload,
    ) -> Result<(), TransportError>;
    async fn add_remote_candidate(&mut self, candidate: String) -> Result<(), TransportError>;
    async fn send_bytes(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;
    /// Take the event stream. Yields `None` once taken.
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;
    async fn close(&mut self);
}

/// Creates one transport per negotiation session.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn PeerTransport>;
}
