use std::collections::VecDeque;

use chat_wire::ChatMessage;
use tokio::sync::mpsc;

use super::transport::{PeerTransport, SignalPayload, TransportEvent};
use crate::common::types::SessionState;

const INPUT_BUFFER: usize = 32;

/// Inputs to a running session, delivered in arrival order.
#[derive(Debug)]
pub enum SessionInput {
    /// Begin negotiation as the caller. Valid only in Idle.
    StartOffer,
    /// A `signal` frame from the remote peer, relayed by the gateway.
    RemoteSignal(SignalPayload),
    /// Send a chat message over the direct channel.
    Deliver(ChatMessage),
    /// Tear the session down.
    Close,
}

/// Outputs from a session back to the owning client.
#[derive(Debug)]
pub enum SessionOutput {
    /// A negotiation payload to forward through the gateway.
    Signal { to: String, payload: SignalPayload },
    StateChanged {
        peer_id: String,
        state: SessionState,
        reason: Option<String>,
    },
    /// A chat message received over the direct channel.
    MessageReceived(ChatMessage),
    /// The session task has finished; the owner drops its handle.
    Ended { peer_id: String },
}

/// Owner-side view of a spawned session.
pub struct SessionHandle {
    input: mpsc::Sender<SessionInput>,
    pub state: SessionState,
}

impl SessionHandle {
    pub async fn send(&self, input: SessionInput) -> bool {
        self.input.send(input).await.is_ok()
    }
}

/// One negotiation with one remote peer.
///
/// The session runs on its own task and processes inputs and transport
/// events strictly in order, so candidate buffering needs no locking:
/// candidates that arrive before the remote description are queued and
/// drained in arrival order once it is applied.
pub struct NegotiationSession {
    remote_peer_id: String,
    state: SessionState,
    pending_candidates: VecDeque<String>,
    remote_description_applied: bool,
    transport: Box<dyn PeerTransport>,
    input: mpsc::Receiver<SessionInput>,
    output: mpsc::Sender<SessionOutput>,
}

impl NegotiationSession {
    /// Spawn a session task; the returned handle feeds its serial queue.
    pub fn spawn(
        remote_peer_id: String,
        transport: Box<dyn PeerTransport>,
        output: mpsc::Sender<SessionOutput>,
    ) -> SessionHandle {
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let session = Self {
            remote_peer_id,
            state: SessionState::Idle,
            pending_candidates: VecDeque::new(),
            remote_description_applied: false,
            transport,
            input: input_rx,
            output,
        };
        tokio::spawn(session.run());
        SessionHandle {
            input: input_tx,
            state: SessionState::Idle,
        }
    }

    async fn run(mut self) {
        let mut transport_events = match self.transport.take_events() {
            Some(events) => events,
            None => {
                log::error!("Transport for {} had no event stream", self.remote_peer_id);
                let _ = self
                    .output
                    .send(SessionOutput::Ended {
                        peer_id: self.remote_peer_id.clone(),
                    })
                    .await;
                return;
            }
        };

        loop {
            tokio::select! {
                input = self.input.recv() => match input {
                    Some(SessionInput::StartOffer) => {
                        if !self.start_offer().await {
                            break;
                        }
                    }
                    Some(SessionInput::RemoteSignal(payload)) => {
                        if !self.handle_signal(payload).await {
                            break;
                        }
                    }
                    Some(SessionInput::Deliver(message)) => {
                        if !self.deliver(message).await {
                            break;
                        }
                    }
                    Some(SessionInput::Close) | None => break,
                },
                event = transport_events.recv() => match event {
                    Some(event) => {
                        if !self.handle_transport_event(event).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.transport.close().await;
        let _ = self
            .output
            .send(SessionOutput::Ended {
                peer_id: self.remote_peer_id.clone(),
            })
            .await;
    }

    async fn start_offer(&mut self) -> bool {
        if self.state != SessionState::Idle {
            log::warn!(
                "Ignoring offer request for {} in state {:?}",
                self.remote_peer_id,
                self.state
            );
            return true;
        }
        self.set_state(SessionState::Offering, None).await;
        match self.transport.create_offer().await {
            Ok(offer) => {
                self.send_signal(offer).await;
                self.set_state(SessionState::AwaitingAnswer, None).await;
                true
            }
            Err(err) => self.fail(err.to_string()).await,
        }
    }

    async fn handle_signal(&mut self, payload: SignalPayload) -> bool {
        match payload {
            offer @ SignalPayload::Offer { .. } => {
                if self.state != SessionState::Idle {
                    // Glare or a stale retry; the existing negotiation wins.
                    log::warn!(
                        "Ignoring offer from {} in state {:?}",
                        self.remote_peer_id,
                        self.state
                    );
                    return true;
                }
                if let Err(err) = self.transport.apply_remote_description(offer).await {
                    return self.fail(err.to_string()).await;
                }
                self.remote_description_applied = true;
                if !self.drain_pending_candidates().await {
                    return false;
                }
                match self.transport.create_answer().await {
                    Ok(answer) => {
                        self.send_signal(answer).await;
                        self.set_state(SessionState::AnsweringOffer, None).await;
                        true
                    }
                    Err(err) => self.fail(err.to_string()).await,
                }
            }
            answer @ SignalPayload::Answer { .. } => {
                if self.state != SessionState::AwaitingAnswer {
                    log::warn!(
                        "Ignoring answer from {} in state {:?}",
                        self.remote_peer_id,
                        self.state
                    );
                    return true;
                }
                if let Err(err) = self.transport.apply_remote_description(answer).await {
                    return self.fail(err.to_string()).await;
                }
                self.remote_description_applied = true;
                // Connected is declared by the transport's Open event.
                self.drain_pending_candidates().await
            }
            SignalPayload::Candidate { candidate } => {
                if self.remote_description_applied {
                    if let Err(err) = self.transport.add_remote_candidate(candidate).await {
                        return self.fail(err.to_string()).await;
                    }
                } else {
                    self.pending_candidates.push_back(candidate);
                }
                true
            }
        }
    }

    async fn drain_pending_candidates(&mut self) -> bool {
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(err) = self.transport.add_remote_candidate(candidate).await {
                return self.fail(err.to_string()).await;
            }
        }
        true
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.send_signal(SignalPayload::Candidate { candidate }).await;
                true
            }
            TransportEvent::Open => {
                self.set_state(SessionState::Connected, None).await;
                true
            }
            TransportEvent::Data(bytes) => {
                match serde_json::from_slice::<ChatMessage>(&bytes) {
                    Ok(message) => {
                        let _ = self
                            .output
                            .send(SessionOutput::MessageReceived(message))
                            .await;
                    }
                    Err(err) => {
                        log::warn!(
                            "Dropping undecodable frame from {}: {err}",
                            self.remote_peer_id
                        );
                    }
                }
                true
            }
            TransportEvent::Closed => {
                self.set_state(SessionState::Idle, None).await;
                false
            }
            TransportEvent::Failed(reason) => self.fail(reason).await,
        }
    }

    async fn deliver(&mut self, message: ChatMessage) -> bool {
        if self.state != SessionState::Connected {
            log::warn!(
                "Dropping direct send to {} in state {:?}",
                self.remote_peer_id,
                self.state
            );
            return true;
        }
        let bytes = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("Failed to encode message {}: {err}", message.id);
                return true;
            }
        };
        match self.transport.send_bytes(bytes).await {
            Ok(()) => true,
            Err(err) => self.fail(err.to_string()).await,
        }
    }

    async fn send_signal(&mut self, payload: SignalPayload) {
        let _ = self
            .output
            .send(SessionOutput::Signal {
                to: self.remote_peer_id.clone(),
                payload,
            })
            .await;
    }

    async fn set_state(&mut self, state: SessionState, reason: Option<String>) {
        if self.state == state {
            return;
        }
        self.state = state;
        let _ = self
            .output
            .send(SessionOutput::StateChanged {
                peer_id: self.remote_peer_id.clone(),
                state,
                reason,
            })
            .await;
    }

    /// Terminal: report Failed and stop the session loop.
    async fn fail(&mut self, reason: String) -> bool {
        log::warn!("Session with {} failed: {reason}", self.remote_peer_id);
        self.set_state(SessionState::Failed, Some(reason)).await;
        false
    }
}
