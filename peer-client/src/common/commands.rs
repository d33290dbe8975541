/// Commands the front end sends down to the network layer.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Send a chat message. Uses the direct channel when the receiver's
    /// session is connected, the relay path otherwise.
    SendMessage {
        content: String,
        receiver_id: Option<String>,
    },
    /// Start direct-channel negotiation with a peer.
    ConnectToPeer { peer_id: String },
    /// Ask the gateway for the current peer list.
    RefreshPeers,
}
