use std::sync::{Mutex, MutexGuard};

use chat_wire::ChatMessage;
use chrono::Utc;
use rusqlite::params;
use thiserror::Error;
use uuid::Uuid;

use super::database::Database;
use super::ensure_parent_dir;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

const MIN_ID_LEN: usize = 3;
const MAX_CONTENT_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Input rejected before touching the database.
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable append + query of chat messages.
///
/// The connection has its own lock, independent of the peer registry: a
/// message write never holds registry state and vice versa.
pub struct MessageStore {
    db: Mutex<Database>,
}

impl MessageStore {
    /// Open (and bootstrap) the store; `:memory:` is supported for tests.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = if path == ":memory:" {
            Database::in_memory()?
        } else {
            ensure_parent_dir(path)?;
            Database::new(path)?
        };
        let store = Self { db: Mutex::new(db) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let db = self.lock();
        db.connection().execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                sender_name TEXT,
                receiver_id TEXT,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        db.connection().execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)",
            [],
        )?;
        Ok(())
    }

    /// Validate, stamp with a fresh id and creation time, and persist.
    pub fn save(
        &self,
        sender_id: &str,
        content: &str,
        receiver_id: Option<&str>,
        sender_name: Option<&str>,
    ) -> Result<ChatMessage, StoreError> {
        validate(sender_id, content, receiver_id)?;

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.map(str::to_string),
            receiver_id: receiver_id.map(str::to_string),
            content: content.to_string(),
            created_at: Utc::now().timestamp_millis(),
        };

        let db = self.lock();
        db.connection().execute(
            "INSERT INTO messages (id, sender_id, sender_name, receiver_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.sender_id,
                message.sender_name,
                message.receiver_id,
                message.content,
                message.created_at
            ],
        )?;
        Ok(message)
    }

    /// Most recent messages, newest first. Insertion order breaks ties.
    pub fn latest(&self, limit: Option<usize>) -> Result<Vec<ChatMessage>, StoreError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let db = self.lock();
        let mut stmt = db.connection().prepare(
            "SELECT id, sender_id, sender_name, receiver_id, content, created_at
             FROM messages
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let messages = stmt
            .query_map(params![limit], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    sender_name: row.get(2)?,
                    receiver_id: row.get(3)?,
                    content: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate(sender_id: &str, content: &str, receiver_id: Option<&str>) -> Result<(), StoreError> {
    if sender_id.chars().count() < MIN_ID_LEN {
        return Err(StoreError::Invalid(format!(
            "senderId must be at least {MIN_ID_LEN} characters"
        )));
    }
    if content.is_empty() || content.chars().count() > MAX_CONTENT_LEN {
        return Err(StoreError::Invalid(format!(
            "content must be 1-{MAX_CONTENT_LEN} characters"
        )));
    }
    if let Some(receiver) = receiver_id {
        if receiver.chars().count() < MIN_ID_LEN {
            return Err(StoreError::Invalid(format!(
                "receiverId must be at least {MIN_ID_LEN} characters"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MessageStore {
        MessageStore::open(":memory:").expect("in-memory store")
    }

    #[test]
    fn stores_and_retrieves_messages_deterministically() {
        let store = store();
        let created = store.save("alice", "hi there", None, None).expect("save");
        assert_eq!(created.sender_id, "alice");
        assert_eq!(created.content, "hi there");
        assert!(!created.id.is_empty());

        let history = store.latest(None).expect("history");
        assert_eq!(history[0].id, created.id);
        assert_eq!(history[0].sender_id, "alice");
    }

    #[test]
    fn latest_returns_newest_first_and_honors_limit() {
        let store = store();
        for n in 0..5 {
            store.save("alice", &format!("message {n}"), None, None).expect("save");
        }
        let history = store.latest(Some(3)).expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "message 4");
        assert_eq!(history[2].content, "message 2");
    }

    #[test]
    fn receiver_and_display_name_survive_a_round_trip() {
        let store = store();
        let created = store
            .save("alice", "psst", Some("bob-1"), Some("Alice"))
            .expect("save");
        let history = store.latest(None).expect("history");
        assert_eq!(history[0].receiver_id.as_deref(), Some("bob-1"));
        assert_eq!(history[0].sender_name.as_deref(), Some("Alice"));
        assert_eq!(history[0].created_at, created.created_at);
    }

    #[test]
    fn rejects_invalid_input() {
        let store = store();
        assert!(matches!(
            store.save("al", "hi", None, None),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.save("alice", "", None, None),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.save("alice", &"x".repeat(2049), None, None),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.save("alice", "hi", Some("b"), None),
            Err(StoreError::Invalid(_))
        ));
        // Nothing was persisted along the way.
        assert!(store.latest(None).expect("history").is_empty());
    }
}
