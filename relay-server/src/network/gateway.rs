use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use chat_wire::{ClientEnvelope, ServerEnvelope};

use crate::http::AppState;
use crate::network::registry::Outbound;

/// WebSocket close code for a failed credential check.
const POLICY_VIOLATION: u16 = 1008;

/// Per-connection protocol handler.
///
/// Connection states: unauthenticated until the credential check passes,
/// unregistered until a valid `hello`, then registered until the socket
/// closes. All errors stay local to this connection.
pub async fn handle_connection(socket: WebSocket, state: AppState, credential: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    if credential.as_deref() != Some(state.config.api_key.as_str()) {
        reject_unauthorized(&mut sink, "Invalid API key").await;
        return;
    }

    // One writer task per connection; the registry and this reader push
    // serialized frames through the same channel.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut current_peer: Option<String> = None;

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("Socket error: {err}");
                break;
            }
        };
        match frame {
            Message::Text(text) => handle_frame(text.as_str(), &out_tx, &mut current_peer, &state),
            Message::Close(_) => break,
            // Ping/pong is handled by the protocol layer.
            _ => {}
        }
    }

    if let Some(peer_id) = current_peer {
        state.registry.remove(&peer_id);
        state
            .registry
            .broadcast(&ServerEnvelope::PeerLeft { peer_id: peer_id.clone() }, None);
        log::info!("Peer disconnected: {peer_id}");
    }
    writer.abort();
}

async fn reject_unauthorized(sink: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let envelope = ServerEnvelope::Error { reason: reason.to_string() };
    if let Ok(frame) = serde_json::to_string(&envelope) {
        let _ = sink.send(Message::Text(frame.into())).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: POLICY_VIOLATION,
            reason: reason.to_string().into(),
        })))
        .await;
}

fn handle_frame(raw: &str, out: &Outbound, current_peer: &mut Option<String>, state: &AppState) {
    let envelope = match serde_json::from_str::<ClientEnvelope>(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            // Malformed input is not fatal to the session.
            reply(out, &ServerEnvelope::Error { reason: format!("malformed frame: {err}") });
            return;
        }
    };

    match envelope {
        ClientEnvelope::Hello { peer_id, display_name } => {
            let peer = state.registry.register(&peer_id, &display_name, out.clone());
            reply(
                out,
                &ServerEnvelope::Welcome {
                    peer: peer.clone(),
                    peers: state.registry.list(),
                    turn: state.config.turn.clone(),
                },
            );
            state
                .registry
                .broadcast(&ServerEnvelope::PeerJoined { peer }, Some(&peer_id));
            log::info!("Peer registered: {peer_id} ({display_name})");
            *current_peer = Some(peer_id);
        }
        ClientEnvelope::Peers => match current_peer {
            Some(_) => reply(out, &ServerEnvelope::Peers { peers: state.registry.list() }),
            None => reply_handshake_required(out),
        },
        ClientEnvelope::Signal { to, data } => match current_peer.as_deref() {
            Some(from) => {
                // The payload is never inspected; absence of the
                // destination is an expected transient, not a fault.
                let delivered = state
                    .registry
                    .send_to(&to, &ServerEnvelope::Signal { from: from.to_string(), data });
                if !delivered {
                    log::debug!("Dropped signal from {from} to unknown peer {to}");
                }
            }
            None => reply_handshake_required(out),
        },
        ClientEnvelope::Message { to, content } => match current_peer.as_deref() {
            Some(sender_id) => handle_message(out, state, sender_id, to, content),
            None => reply_handshake_required(out),
        },
    }
}

/// Relay-path chat: persist first, then deliver best-effort, and always
/// ack the stored message back to the sender.
fn handle_message(
    out: &Outbound,
    state: &AppState,
    sender_id: &str,
    to: Option<String>,
    content: String,
) {
    let sender_name = state.registry.lookup(sender_id).map(|peer| peer.display_name);
    let stored = match state
        .store
        .save(sender_id, &content, to.as_deref(), sender_name.as_deref())
    {
        Ok(stored) => stored,
        Err(err) => {
            // A store failure must not silently drop a message the
            // sender believes was sent.
            log::error!("Failed to persist message from {sender_id}: {err}");
            reply(out, &ServerEnvelope::Error { reason: err.to_string() });
            return;
        }
    };

    match stored.receiver_id.as_deref() {
        Some(receiver) => {
            state
                .registry
                .send_to(receiver, &ServerEnvelope::Message { message: stored.clone() });
        }
        None => {
            state
                .registry
                .broadcast(&ServerEnvelope::Message { message: stored.clone() }, Some(sender_id));
        }
    }
    reply(out, &ServerEnvelope::MessageAck { message: stored });
}

fn reply(out: &Outbound, envelope: &ServerEnvelope) {
    match serde_json::to_string(envelope) {
        Ok(frame) => {
            let _ = out.send(frame);
        }
        Err(err) => log::warn!("Failed to serialize reply: {err}"),
    }
}

fn reply_handshake_required(out: &Outbound) {
    reply(out, &ServerEnvelope::Error { reason: "Handshake required".to_string() });
}
