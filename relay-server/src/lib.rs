//! Signaling and relay server: peer registry, WebSocket signaling gateway,
//! durable message store and the REST surface for history/peers.

pub mod config;
pub mod http;
pub mod network;
pub mod storage;
