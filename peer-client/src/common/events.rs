use chat_wire::{ChatMessage, PeerSummary};

use super::types::{ConnectionStatus, SessionState};

/// Events from the network layer up to the front end.
///
/// A message is emitted exactly once regardless of how many transports
/// delivered it; deduplication happens before these events fire.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    MessageReceived(ChatMessage),
    HistorySynced(Vec<ChatMessage>),
    PeerJoined(PeerSummary),
    PeerLeft(String),
    PeerList(Vec<PeerSummary>),
    Status {
        status: ConnectionStatus,
        reason: Option<String>,
    },
    SessionChanged {
        peer_id: String,
        state: SessionState,
        reason: Option<String>,
    },
}
