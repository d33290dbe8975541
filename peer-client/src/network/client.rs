use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::error::Error;
use std::sync::Arc;

use chat_wire::{ChatMessage, ClientEnvelope, PeerSummary, ServerEnvelope};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use super::session::{NegotiationSession, SessionInput, SessionOutput};
use super::transport::{SignalPayload, TransportFactory};
use crate::api::{NewMessage, RelayApi};
use crate::common::commands::ClientCommand;
use crate::common::events::ClientEvent;
use crate::common::types::{ConnectionStatus, SessionState};
use crate::config::ClientConfig;
use crate::state::{MessageLog, PeerRoster};

const HISTORY_LIMIT: usize = 50;
const SESSION_OUTPUT_BUFFER: usize = 64;

/// The network half of the chat client.
///
/// Owns the signaling connection, one negotiation session per remote peer
/// and the deduplicated message log; talks to the front end exclusively
/// through the command/event channel pair.
pub struct ChatClient {
    config: ClientConfig,
    peer_id: String,
    event_sender: mpsc::Sender<ClientEvent>,
    command_receiver: mpsc::Receiver<ClientCommand>,
    transport_factory: Arc<dyn TransportFactory>,
    api: RelayApi,
    sessions: HashMap<String, super::session::SessionHandle>,
    session_output_tx: mpsc::Sender<SessionOutput>,
    session_output_rx: mpsc::Receiver<SessionOutput>,
    log: MessageLog,
    roster: PeerRoster,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        event_sender: mpsc::Sender<ClientEvent>,
        command_receiver: mpsc::Receiver<ClientCommand>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let api = RelayApi::new(&config.api_url);
        let (session_output_tx, session_output_rx) = mpsc::channel(SESSION_OUTPUT_BUFFER);
        Self {
            config,
            peer_id: Uuid::new_v4().to_string(),
            event_sender,
            command_receiver,
            transport_factory,
            api,
            sessions: HashMap::new(),
            session_output_tx,
            session_output_rx,
            log: MessageLog::new(),
            roster: PeerRoster::new(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Connect to the gateway and process traffic until the connection or
    /// the command channel closes.
    pub async fn run(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.emit_status(ConnectionStatus::Connecting, None).await;

        let url = format!("{}?apiKey={}", self.config.signaling_url, self.config.api_key);
        let (stream, _) = connect_async(&url).await?;
        let (mut ws_writer, mut ws_reader) = stream.split();

        // Serialize all outbound frames through one writer task.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(WsMessage::Text(frame)).await.is_err() {
                    break;
                }
            }
        });

        send_envelope(
            &out_tx,
            &ClientEnvelope::Hello {
                peer_id: self.peer_id.clone(),
                display_name: self.config.display_name.clone(),
            },
        );

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => match command {
                    Some(command) => self.handle_command(command, &out_tx).await,
                    None => break,
                },
                output = self.session_output_rx.recv() => {
                    // The client holds a sender clone, so this arm never
                    // sees None while the loop runs.
                    if let Some(output) = output {
                        self.handle_session_output(output, &out_tx).await;
                    }
                },
                incoming = ws_reader.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerEnvelope>(&text) {
                            Ok(envelope) => self.handle_server_frame(envelope).await,
                            Err(err) => log::warn!("Undecodable frame from gateway: {err}"),
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        log::info!("Gateway closed the connection: {frame:?}");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        log::error!("Signaling connection error: {err}");
                        self.emit_status(ConnectionStatus::Error, Some(err.to_string()))
                            .await;
                        break;
                    }
                    None => break,
                },
            }
        }

        for (_, handle) in self.sessions.drain() {
            handle.send(SessionInput::Close).await;
        }
        self.emit_status(ConnectionStatus::Disconnected, None).await;
        writer.abort();
        Ok(())
    }

    async fn handle_command(
        &mut self,
        command: ClientCommand,
        out_tx: &mpsc::UnboundedSender<String>,
    ) {
        match command {
            ClientCommand::SendMessage { content, receiver_id } => {
                self.send_message(content, receiver_id, out_tx).await;
            }
            ClientCommand::ConnectToPeer { peer_id } => {
                if peer_id == self.peer_id {
                    log::warn!("Refusing to negotiate with self");
                    return;
                }
                let handle = self.ensure_session(&peer_id);
                if !handle.send(SessionInput::StartOffer).await {
                    self.sessions.remove(&peer_id);
                }
            }
            ClientCommand::RefreshPeers => {
                send_envelope(out_tx, &ClientEnvelope::Peers);
            }
        }
    }

    /// Direct channel when the receiver's session is connected, relay
    /// otherwise. Direct sends are persisted through the REST surface so
    /// history stays complete either way.
    async fn send_message(
        &mut self,
        content: String,
        receiver_id: Option<String>,
        out_tx: &mpsc::UnboundedSender<String>,
    ) {
        let direct_target = receiver_id.as_deref().and_then(|peer_id| {
            self.sessions
                .get(peer_id)
                .filter(|handle| handle.state == SessionState::Connected)
                .map(|_| peer_id.to_string())
        });

        match direct_target {
            Some(peer_id) => {
                let message = ChatMessage {
                    id: Uuid::new_v4().to_string(),
                    sender_id: self.peer_id.clone(),
                    sender_name: Some(self.config.display_name.clone()),
                    receiver_id: receiver_id.clone(),
                    content,
                    created_at: Utc::now().timestamp_millis(),
                };
                if let Some(handle) = self.sessions.get(&peer_id) {
                    handle.send(SessionInput::Deliver(message.clone())).await;
                }
                self.persist_direct(&message);
                self.push_message(message).await;
            }
            None => {
                // The gateway assigns id and timestamp; the ack brings
                // the canonical record into the log.
                send_envelope(
                    out_tx,
                    &ClientEnvelope::Message {
                        to: receiver_id,
                        content,
                    },
                );
            }
        }
    }

    /// Best-effort history write for messages that bypassed the relay.
    fn persist_direct(&self, message: &ChatMessage) {
        let api = self.api.clone();
        let message = message.clone();
        tokio::spawn(async move {
            let body = NewMessage {
                sender_id: &message.sender_id,
                sender_name: message.sender_name.as_deref(),
                receiver_id: message.receiver_id.as_deref(),
                content: &message.content,
            };
            if let Err(err) = api.post_message(&body).await {
                log::warn!("Failed to persist direct message {}: {err}", message.id);
            }
        });
    }

    async fn handle_server_frame(&mut self, envelope: ServerEnvelope) {
        match envelope {
            ServerEnvelope::Welcome { peer, peers, turn } => {
                log::info!("Registered with the gateway as {}", peer.peer_id);
                if !turn.url.is_empty() {
                    log::info!("Relay transport available at {}", turn.url);
                }
                let peers = self.without_self(peers);
                self.roster.replace(peers.clone());
                self.emit_status(ConnectionStatus::Connected, None).await;
                self.emit(ClientEvent::PeerList(peers)).await;
                self.hydrate_history().await;
            }
            ServerEnvelope::Peers { peers } => {
                let peers = self.without_self(peers);
                self.roster.replace(peers.clone());
                self.emit(ClientEvent::PeerList(peers)).await;
            }
            ServerEnvelope::Signal { from, data } => {
                let payload = match serde_json::from_value::<SignalPayload>(data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        log::warn!("Dropping malformed signal from {from}: {err}");
                        return;
                    }
                };
                let handle = self.ensure_session(&from);
                if !handle.send(SessionInput::RemoteSignal(payload)).await {
                    self.sessions.remove(&from);
                }
            }
            ServerEnvelope::Message { message } | ServerEnvelope::MessageAck { message } => {
                self.push_message(message).await;
            }
            ServerEnvelope::PeerJoined { peer } => {
                if peer.peer_id != self.peer_id && self.roster.upsert(peer.clone()) {
                    self.emit(ClientEvent::PeerJoined(peer)).await;
                }
            }
            ServerEnvelope::PeerLeft { peer_id } => {
                if let Some(handle) = self.sessions.remove(&peer_id) {
                    handle.send(SessionInput::Close).await;
                }
                if self.roster.remove(&peer_id) {
                    self.emit(ClientEvent::PeerLeft(peer_id)).await;
                }
            }
            ServerEnvelope::Error { reason } => {
                log::warn!("Gateway error: {reason}");
                self.emit_status(ConnectionStatus::Error, Some(reason)).await;
            }
        }
    }

    async fn handle_session_output(
        &mut self,
        output: SessionOutput,
        out_tx: &mpsc::UnboundedSender<String>,
    ) {
        match output {
            SessionOutput::Signal { to, payload } => match serde_json::to_value(&payload) {
                Ok(data) => send_envelope(out_tx, &ClientEnvelope::Signal { to, data }),
                Err(err) => log::error!("Failed to encode signal for {to}: {err}"),
            },
            SessionOutput::StateChanged { peer_id, state, reason } => {
                if let Some(handle) = self.sessions.get_mut(&peer_id) {
                    handle.state = state;
                }
                self.emit(ClientEvent::SessionChanged { peer_id, state, reason })
                    .await;
            }
            SessionOutput::MessageReceived(message) => {
                self.push_message(message).await;
            }
            SessionOutput::Ended { peer_id } => {
                self.sessions.remove(&peer_id);
            }
        }
    }

    /// Pull recent history over REST once registered.
    async fn hydrate_history(&mut self) {
        let page = match self.api.fetch_messages(HISTORY_LIMIT).await {
            Ok(page) => page,
            Err(err) => {
                log::warn!("History fetch failed: {err}");
                return;
            }
        };
        // The endpoint returns newest first.
        let mut fresh = Vec::new();
        for message in page.into_iter().rev() {
            if self.log.insert(message.clone()) {
                fresh.push(message);
            }
        }
        if !fresh.is_empty() {
            self.emit(ClientEvent::HistorySynced(fresh)).await;
        }
    }

    fn ensure_session(&mut self, peer_id: &str) -> &super::session::SessionHandle {
        match self.sessions.entry(peer_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let transport = self.transport_factory.create();
                let handle = NegotiationSession::spawn(
                    peer_id.to_string(),
                    transport,
                    self.session_output_tx.clone(),
                );
                entry.insert(handle)
            }
        }
    }

    fn without_self(&self, peers: Vec<PeerSummary>) -> Vec<PeerSummary> {
        peers
            .into_iter()
            .filter(|peer| peer.peer_id != self.peer_id)
            .collect()
    }

    async fn push_message(&mut self, message: ChatMessage) {
        if self.log.insert(message.clone()) {
            self.emit(ClientEvent::MessageReceived(message)).await;
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if self.event_sender.send(event).await.is_err() {
            log::debug!("Event receiver dropped");
        }
    }

    async fn emit_status(&self, status: ConnectionStatus, reason: Option<String>) {
        self.emit(ClientEvent::Status { status, reason }).await;
    }
}

fn send_envelope(out_tx: &mpsc::UnboundedSender<String>, envelope: &ClientEnvelope) {
    match serde_json::to_string(envelope) {
        Ok(frame) => {
            let _ = out_tx.send(frame);
        }
        Err(err) => log::error!("Failed to encode outbound frame: {err}"),
    }
}
