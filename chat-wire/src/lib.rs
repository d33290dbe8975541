//! Shared wire types for the relay-signaled chat protocol.
//!
//! Both binaries speak UTF-8 JSON frames: clients send [`ClientEnvelope`]s
//! (discriminated by `action`), the relay answers with [`ServerEnvelope`]s
//! (discriminated by `type`). Negotiation payloads inside `signal` frames
//! stay opaque `serde_json::Value`s here; the relay forwards them without
//! ever parsing them.

pub mod envelope;
pub mod types;

pub use envelope::{ClientEnvelope, ServerEnvelope};
pub use types::{ChatMessage, PeerSummary, TurnConfig};
