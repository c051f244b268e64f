use garimpo_common::{Error, Result, Sender, StoredMessage, ThoughtLogEntry};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

use crate::{now_timestamp, open_connection, open_in_memory, parse_timestamp};

/// Conversation header as listed to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Persistent storage for conversations and their message history.
pub struct ConversationStore {
    conn: Connection,
}

impl ConversationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let store = Self {
            conn: open_connection(db_path)?,
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: open_in_memory()?,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_conversations_user
                    ON conversations(user_id, updated_at);

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL
                        REFERENCES conversations(id) ON DELETE CASCADE,
                    sender TEXT NOT NULL CHECK (sender IN ('user', 'ai')),
                    message_text TEXT NOT NULL,
                    thought_log TEXT NOT NULL DEFAULT '[]',
                    timestamp TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_conversation
                    ON messages(conversation_id, timestamp);",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Create a conversation owned by `user_id`.
    pub fn create_conversation(&self, user_id: &str, title: &str) -> Result<ConversationSummary> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, user_id, title, now],
            )
            .map_err(|e| Error::Database(format!("failed to create conversation: {e}")))?;

        debug!("created conversation {id} for user {user_id}");
        let ts = parse_timestamp(&now);
        Ok(ConversationSummary {
            id,
            title: title.to_string(),
            created_at: ts,
            updated_at: ts,
        })
    }

    /// Owner of a conversation, or `None` when it does not exist.
    pub fn conversation_owner(&self, conversation_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT user_id FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to look up conversation: {e}")))
    }

    /// Conversations owned by `user_id`, most recently active first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, created_at, updated_at
                 FROM conversations
                 WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare conversation query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                let created_raw: String = row.get(2)?;
                let updated_raw: String = row.get(3)?;
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: parse_timestamp(&created_raw),
                    updated_at: parse_timestamp(&updated_raw),
                })
            })
            .map_err(|e| Error::Database(format!("failed to list conversations: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read conversation row: {e}")))
    }

    /// Full message history of a conversation in chronological order.
    pub fn get_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, sender, message_text, thought_log, timestamp
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp ASC, rowid ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, sender_raw, text, thought_log_raw, timestamp_raw) =
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?;
            let thought_log: Vec<ThoughtLogEntry> = serde_json::from_str(&thought_log_raw).unwrap_or_else(|e| {
                warn!("discarding unreadable thought log on message {id}: {e}");
                Vec::new()
            });
            messages.push(StoredMessage {
                sender: sender_raw.parse::<Sender>()?,
                text,
                thought_log,
                timestamp: parse_timestamp(&timestamp_raw),
                id,
            });
        }
        Ok(messages)
    }

    /// Append a message and bump the conversation's `updated_at` in one transaction.
    pub fn append_message(
        &mut self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
        thought_log: &[ThoughtLogEntry],
    ) -> Result<StoredMessage> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let thought_log_json = serde_json::to_string(thought_log)
            .map_err(|e| Error::Database(format!("failed to encode thought log: {e}")))?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let touched = tx
            .execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![conversation_id, now],
            )
            .map_err(|e| Error::Database(format!("failed to touch conversation: {e}")))?;
        if touched == 0 {
            return Err(Error::NotFound(format!("conversation {conversation_id}")));
        }

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender, message_text, thought_log, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, conversation_id, sender.as_str(), text, thought_log_json, now],
        )
        .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit message: {e}")))?;

        Ok(StoredMessage {
            id,
            sender,
            text: text.to_string(),
            thought_log: thought_log.to_vec(),
            timestamp: parse_timestamp(&now),
        })
    }

    /// Delete a conversation and its messages. Only the owner may delete.
    pub fn delete_conversation(&mut self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![conversation_id, user_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete conversation: {e}")))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_read_history_in_order() {
        let mut store = ConversationStore::in_memory().unwrap();
        let conv = store.create_conversation("ana", "Sci-fi night").unwrap();

        store
            .append_message(&conv.id, Sender::User, "Something like Arrival?", &[])
            .unwrap();
        let log = vec![ThoughtLogEntry::tool_call(
            "get_similar_movies",
            json!({"title": "Arrival"}),
        )];
        store
            .append_message(&conv.id, Sender::Ai, "Try Contact.", &log)
            .unwrap();

        let history = store.get_history(&conv.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[1].text, "Try Contact.");
        assert_eq!(history[1].thought_log, log);
    }

    #[test]
    fn append_to_missing_conversation_writes_nothing() {
        let mut store = ConversationStore::in_memory().unwrap();
        let err = store
            .append_message("nope", Sender::User, "hello", &[])
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn append_bumps_conversation_to_top_of_list() {
        let mut store = ConversationStore::in_memory().unwrap();
        let first = store.create_conversation("ana", "First").unwrap();
        let second = store.create_conversation("ana", "Second").unwrap();
        store.create_conversation("bruno", "Other user").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        store
            .append_message(&first.id, Sender::User, "back again", &[])
            .unwrap();

        let listed = store.list_conversations("ana").unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
    }

    #[test]
    fn owner_lookup_and_scoped_delete() {
        let mut store = ConversationStore::in_memory().unwrap();
        let conv = store.create_conversation("ana", "Noir").unwrap();
        store
            .append_message(&conv.id, Sender::User, "Chinatown?", &[])
            .unwrap();

        assert_eq!(
            store.conversation_owner(&conv.id).unwrap().as_deref(),
            Some("ana")
        );
        assert_eq!(store.conversation_owner("missing").unwrap(), None);

        assert!(!store.delete_conversation(&conv.id, "bruno").unwrap());
        assert!(store.delete_conversation(&conv.id, "ana").unwrap());
        assert!(store.get_history(&conv.id).unwrap().is_empty());
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garimpo.db");
        let conv_id = {
            let mut store = ConversationStore::open(&path).unwrap();
            let conv = store.create_conversation("ana", "Persisted").unwrap();
            store
                .append_message(&conv.id, Sender::User, "hi", &[])
                .unwrap();
            conv.id
        };

        let store = ConversationStore::open(&path).unwrap();
        assert_eq!(store.get_history(&conv_id).unwrap().len(), 1);
    }
}
