//! Chat client: signaling connection to the relay, per-remote-peer
//! negotiation sessions, direct-channel transport and local message state.

pub mod api;
pub mod common;
pub mod config;
pub mod network;
pub mod state;
