use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chat_wire::{PeerSummary, ServerEnvelope};
use tokio::sync::mpsc;

/// Outbound handle for one signaling connection. Serialized frames pushed
/// here are drained by that connection's writer task; a closed receiver
/// means the connection is gone and delivery is silently dropped.
pub type Outbound = mpsc::UnboundedSender<String>;

struct PeerEntry {
    display_name: String,
    outbound: Outbound,
}

/// Authoritative table of currently-connected peers.
///
/// A single lock guards the table. Delivery never happens while the lock
/// is held: `broadcast` serializes the event once and snapshots the
/// outbound handles first, so concurrent register/remove during a
/// broadcast cannot corrupt iteration or deadlock.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, PeerEntry>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or silently replace (last-write-wins on duplicate hello).
    pub fn register(&self, peer_id: &str, display_name: &str, outbound: Outbound) -> PeerSummary {
        self.lock().insert(
            peer_id.to_string(),
            PeerEntry {
                display_name: display_name.to_string(),
                outbound,
            },
        );
        PeerSummary {
            peer_id: peer_id.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// No-op when the peer is not registered.
    pub fn remove(&self, peer_id: &str) {
        self.lock().remove(peer_id);
    }

    pub fn lookup(&self, peer_id: &str) -> Option<PeerSummary> {
        self.lock().get(peer_id).map(|entry| PeerSummary {
            peer_id: peer_id.to_string(),
            display_name: entry.display_name.clone(),
        })
    }

    /// Snapshot of the current membership.
    pub fn list(&self) -> Vec<PeerSummary> {
        self.lock()
            .iter()
            .map(|(peer_id, entry)| PeerSummary {
                peer_id: peer_id.clone(),
                display_name: entry.display_name.clone(),
            })
            .collect()
    }

    /// Best-effort targeted delivery. Returns false when the peer is
    /// unknown or its connection is gone; never an error.
    pub fn send_to(&self, peer_id: &str, envelope: &ServerEnvelope) -> bool {
        let Some(payload) = serialize(envelope) else {
            return false;
        };
        let outbound = {
            let peers = self.lock();
            match peers.get(peer_id) {
                Some(entry) => entry.outbound.clone(),
                None => return false,
            }
        };
        outbound.send(payload).is_ok()
    }

    /// Serialize once, snapshot the membership, deliver outside the lock.
    /// Closed connections are skipped silently.
    pub fn broadcast(&self, envelope: &ServerEnvelope, exclude: Option<&str>) {
        let Some(payload) = serialize(envelope) else {
            return;
        };
        let targets: Vec<Outbound> = {
            let peers = self.lock();
            peers
                .iter()
                .filter(|(peer_id, _)| Some(peer_id.as_str()) != exclude)
                .map(|(_, entry)| entry.outbound.clone())
                .collect()
        };
        for outbound in targets {
            let _ = outbound.send(payload.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PeerEntry>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn serialize(envelope: &ServerEnvelope) -> Option<String> {
    match serde_json::to_string(envelope) {
        Ok(payload) => Some(payload),
        Err(err) => {
            log::warn!("Failed to serialize envelope: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (Outbound, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn duplicate_register_overwrites_instead_of_duplicating() {
        let registry = PeerRegistry::new();
        let (old_tx, mut old_rx) = channel();
        let (new_tx, mut new_rx) = channel();

        registry.register("alice-1", "Alice", old_tx);
        registry.register("alice-1", "Alice v2", new_tx);

        let peers = registry.list();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].display_name, "Alice v2");

        // Delivery goes to the latest transport handle only.
        assert!(registry.send_to(
            "alice-1",
            &ServerEnvelope::PeerLeft { peer_id: "x-1".into() }
        ));
        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_reaches_everyone_except_the_excluded_peer() {
        let registry = PeerRegistry::new();
        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();
        let (carol_tx, mut carol_rx) = channel();
        registry.register("alice-1", "Alice", alice_tx);
        registry.register("bob-1", "Bob", bob_tx);
        registry.register("carol-1", "Carol", carol_tx);

        let event = ServerEnvelope::PeerLeft { peer_id: "dave-1".into() };
        registry.broadcast(&event, Some("bob-1"));

        assert!(alice_rx.try_recv().is_ok());
        assert!(carol_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());
        // Exactly once per recipient.
        assert!(alice_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[test]
    fn delivery_to_closed_connections_is_dropped_silently() {
        let registry = PeerRegistry::new();
        let (alice_tx, alice_rx) = channel();
        registry.register("alice-1", "Alice", alice_tx);
        drop(alice_rx);

        let event = ServerEnvelope::PeerLeft { peer_id: "x-1".into() };
        registry.broadcast(&event, None);
        assert!(!registry.send_to("alice-1", &event));
        assert!(!registry.send_to("ghost-1", &event));
    }

    #[test]
    fn remove_is_a_no_op_for_unknown_peers() {
        let registry = PeerRegistry::new();
        registry.remove("nobody");
        let (tx, _rx) = channel();
        registry.register("alice-1", "Alice", tx);
        registry.remove("alice-1");
        assert!(registry.list().is_empty());
        assert!(registry.lookup("alice-1").is_none());
    }
}
