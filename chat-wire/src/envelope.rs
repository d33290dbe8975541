use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ChatMessage, PeerSummary, TurnConfig};

/// Frames a client may send to the gateway.
///
/// Closed sum type: an unknown or malformed `action` fails deserialization
/// at the boundary instead of being coerced into something else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientEnvelope {
    /// Handshake; must be the first frame on a connection.
    Hello {
        peer_id: String,
        display_name: String,
    },
    /// Ask for the current peer list.
    Peers,
    /// Opaque negotiation payload to relay to `to`.
    Signal { to: String, data: Value },
    /// Chat content over the relay path; `to` absent means broadcast.
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        content: String,
    },
}

/// Frames the gateway may send to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEnvelope {
    /// Handshake reply: the registered identity, current membership and
    /// the relay-transport config (forwarded verbatim, never inspected).
    Welcome {
        peer: PeerSummary,
        peers: Vec<PeerSummary>,
        turn: TurnConfig,
    },
    Peers {
        peers: Vec<PeerSummary>,
    },
    /// Relayed negotiation payload, untouched.
    Signal {
        from: String,
        data: Value,
    },
    Message {
        message: ChatMessage,
    },
    MessageAck {
        message: ChatMessage,
    },
    PeerJoined {
        peer: PeerSummary,
    },
    PeerLeft {
        peer_id: String,
    },
    Error {
        reason: String,
    },
}
