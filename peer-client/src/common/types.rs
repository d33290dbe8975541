/// User-visible state of the signaling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Lifecycle of one per-remote-peer negotiation.
///
/// Caller side walks Idle → Offering → AwaitingAnswer → Connected; callee
/// side Idle → AnsweringOffer → Connected. Failed is terminal for the
/// session object; a fresh connect starts a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Offering,
    AwaitingAnswer,
    AnsweringOffer,
    Connected,
    Failed,
}
