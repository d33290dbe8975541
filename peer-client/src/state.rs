use std::collections::HashSet;

use chat_wire::{ChatMessage, PeerSummary};

/// Ordered, identity-deduplicated message collection.
///
/// A message that arrives over both the direct channel and the relay echo
/// is kept once; rendering order is non-decreasing `created_at` with
/// arrival order breaking ties (the sort is stable).
#[derive(Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id was already present.
    pub fn insert(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        self.messages.sort_by_key(|message| message.created_at);
        true
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Last-known membership snapshot from the relay.
#[derive(Default)]
pub struct PeerRoster {
    peers: Vec<PeerSummary>,
}

impl PeerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, peers: Vec<PeerSummary>) {
        self.peers = peers;
    }

    /// Returns true when the peer was not known before.
    pub fn upsert(&mut self, peer: PeerSummary) -> bool {
        if let Some(existing) = self.peers.iter_mut().find(|p| p.peer_id == peer.peer_id) {
            existing.display_name = peer.display_name;
            return false;
        }
        self.peers.push(peer);
        true
    }

    pub fn remove(&mut self, peer_id: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|peer| peer.peer_id != peer_id);
        self.peers.len() != before
    }

    pub fn peers(&self) -> &[PeerSummary] {
        &self.peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, created_at: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            sender_id: "alice-1".to_string(),
            sender_name: None,
            receiver_id: None,
            content: format!("message {id}"),
            created_at,
        }
    }

    #[test]
    fn duplicate_ids_are_kept_exactly_once() {
        let mut log = MessageLog::new();
        assert!(log.insert(message("m1", 10)));
        // Same identity via the other delivery path.
        assert!(!log.insert(message("m1", 10)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn ordering_is_by_creation_time_regardless_of_arrival() {
        let mut log = MessageLog::new();
        log.insert(message("m3", 30));
        log.insert(message("m1", 10));
        log.insert(message("m2", 20));
        let ids: Vec<&str> = log.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut log = MessageLog::new();
        log.insert(message("first", 10));
        log.insert(message("second", 10));
        let ids: Vec<&str> = log.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["first", "second"]);
    }

    #[test]
    fn roster_upsert_updates_in_place() {
        let mut roster = PeerRoster::new();
        assert!(roster.upsert(PeerSummary {
            peer_id: "bob-1".into(),
            display_name: "Bob".into(),
        }));
        assert!(!roster.upsert(PeerSummary {
            peer_id: "bob-1".into(),
            display_name: "Bobby".into(),
        }));
        assert_eq!(roster.peers().len(), 1);
        assert_eq!(roster.peers()[0].display_name, "Bobby");
        assert!(roster.remove("bob-1"));
        assert!(!roster.remove("bob-1"));
    }
}
