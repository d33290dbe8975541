use serde::{Deserialize, Serialize};

/// A chat message as stored and relayed.
///
/// Immutable once created; `id` is generated by whichever side originates
/// the message and is the sole deduplication key downstream. An absent
/// `receiver_id` means broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    pub content: String,
    /// Wall-clock creation time in milliseconds.
    pub created_at: i64,
}

/// Public view of a registered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub display_name: String,
}

/// Relay-transport configuration forwarded verbatim inside `welcome`.
/// Opaque to the gateway; empty fields mean "no relay server configured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}
